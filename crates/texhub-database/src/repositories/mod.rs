//! Repository implementations backing the real-time layer.

pub mod epoch;

pub use epoch::EpochRepository;
