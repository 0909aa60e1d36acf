//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for jobs, lock tokens and pipeline-created rows.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based job ID.
    ///
    /// ULIDs sort by creation time, which keeps queue dumps readable.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a time-ordered numeric ID for rows created by the pipeline.
    ///
    /// Milliseconds since the epoch in the high bits, 16 random bits below.
    #[must_use]
    pub fn generate_numeric(&self) -> i64 {
        let ulid = Ulid::new();
        let millis = (ulid.timestamp_ms() & 0x7FFF_FFFF_FFFF) as i64;
        (millis << 16) | (ulid.random() & 0xFFFF) as i64
    }

    /// Generate an unguessable lock holder token.
    #[must_use]
    pub fn generate_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
