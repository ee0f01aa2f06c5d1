//! Intent detection and cross-turn stabilization.

pub mod lock;
pub mod router;

pub use lock::IntentLock;
pub use router::{Detection, IntentRouter};

/// Intent id that always wins an override check, no matter the priorities.
pub const ESCALATE_INTENT: &str = "ESCALATE";
