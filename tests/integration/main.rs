//! End-to-end tests against a server bound to an ephemeral port, with
//! in-process cache and pub/sub backends.

mod helpers;
mod revocation_test;
mod session_test;
mod status_test;
