//! Unique lock values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Produces values of the form `host:pid:salt:counter:timestamp`.
///
/// The salt is drawn once per generator so two processes that share a
/// host name and pid (a restarted container) still never collide.
#[derive(Debug)]
pub struct TokenGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl TokenGenerator {
    /// Seed a generator from the current process identity.
    pub fn new() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self::with_identity(&host, std::process::id())
    }

    /// Seed a generator with an explicit identity.
    pub fn with_identity(host: &str, pid: u32) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        Self {
            prefix: format!("{host}:{pid}:{}", &salt[..16]),
            counter: AtomicU64::new(0),
        }
    }

    /// Next unique value.
    pub fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("{}:{n}:{ts}", self.prefix)
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}
