// 🔖 Reference Numbers & Identity
// Reference number = VALUE shown to users (may collide)
// Id = IDENTITY used as the key (UUID, never changes)

use chrono::{DateTime, Utc};
use rand::Rng;

/// Mints the human-facing reference number of a new declaration
pub trait ReferenceGenerator {
    fn generate(&self, now: DateTime<Utc>) -> String;
}

/// `<PREFIX>-YYYYMMDD-NNNN` with a random zero-padded suffix
///
/// Not collision-free: two declarations created the same day can share a
/// reference. Treat it as a display convenience only.
#[derive(Debug, Clone)]
pub struct DatedReferenceGenerator {
    prefix: String,
}

impl DatedReferenceGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        DatedReferenceGenerator {
            prefix: prefix.into(),
        }
    }
}

impl Default for DatedReferenceGenerator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_JURISDICTION_PREFIX)
    }
}

impl ReferenceGenerator for DatedReferenceGenerator {
    fn generate(&self, now: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
        format!("{}-{}-{:04}", self.prefix, now.format("%Y%m%d"), suffix)
    }
}

/// Reference given to a duplicated declaration
pub fn copy_reference(source: &str) -> String {
    format!("{}-COPY", source)
}

/// Mints process-unique identities for declarations and line items
pub trait IdGenerator {
    fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
