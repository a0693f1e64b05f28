//! Claude Code transcript handling: listing, discovery and sentinel removal.

pub mod discovery;
pub mod sanitizer;
pub mod scanner;

pub use discovery::{CancelToken, SessionDiscovery, Snapshot};
pub use sanitizer::remove_sentinel;
pub use scanner::{TranscriptEntry, TranscriptScanner};
