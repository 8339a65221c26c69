//! Redis-backed [`CacheProvider`](texhub_core::traits::CacheProvider).

mod client;
mod operations;

pub use self::client::RedisClient;
pub use self::operations::RedisCacheProvider;
