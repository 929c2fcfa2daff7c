//! Shared helpers: tracing setup, retry policies, identifiers.

pub mod bootstrap;
pub mod retry;

use uuid::Uuid;

/// Short random hex identifier (12 characters) for nodes and requests.
pub fn short_id() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..6])
}
