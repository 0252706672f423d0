pub mod action;
pub mod artifact;
pub mod credit;
pub mod error;
pub mod event;
pub mod plan;
pub mod provider;
pub mod run;
pub mod tool;

pub use action::*;
pub use artifact::*;
pub use credit::*;
pub use error::*;
pub use event::*;
pub use plan::*;
pub use provider::*;
pub use run::*;
pub use tool::*;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stable, non-cryptographic hash used for dedup keys (prompt_hash, idempotency keys) where
/// content-addressing doesn't need to resist adversarial collisions.
pub fn hash_str(input: &str) -> String {
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// `idempotency_key = hash(run_id, step sequence, tool_name)`.
pub fn step_idempotency_key(run_id: &str, sequence: u32, tool_name: &str) -> String {
    hash_str(&format!("{run_id}:{sequence}:{tool_name}"))
}
