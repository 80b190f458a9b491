//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for entities.
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

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs sort lexicographically by creation time, which message ordering
    /// uses as a tie-breaker for rows created in the same millisecond.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate an opaque handle for a live realtime connection.
    #[must_use]
    pub fn generate_connection_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
