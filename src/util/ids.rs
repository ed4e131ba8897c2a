//! Identifier generation.

use uuid::Uuid;

/// Generate a random job identifier (UUID v4, hyphenated).
#[must_use]
pub fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}
