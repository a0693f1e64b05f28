//! Local session records and their lifecycle.
//!
//! # Module Structure
//!
//! - [`store`]: One JSON file per session, written atomically
//! - [`lock`]: Advisory per-session lock around load-modify-save
//! - [`lifecycle`]: Create/resume, binding, launch and state transitions

pub mod lifecycle;
pub mod lock;
pub mod store;

pub use lifecycle::{Prepared, ResumeOutcome, SessionLifecycle};
pub use lock::SessionLock;
pub use store::MetadataStore;
