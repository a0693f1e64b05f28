//! # kamui-core
//!
//! Named, resumable Claude Code sessions.
//!
//! Claude Code identifies conversations by ids it generates itself. kamui keeps
//! a small record per human-chosen name (`Tasks`, `payments-refactor`) and
//! binds it to the transcript Claude created, so `kam Tasks` always resumes the
//! same conversation.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The only concurrency is a separate
//!   watcher process.
//! - **Claude owns its files**: Transcripts are listed and read; the only write
//!   is a one-time removal of the message kamui injected.
//! - **Fail loudly on bad data**: Corrupted records and malformed config are
//!   errors, never silently replaced.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kamui_core::{load_config, ClaudeCli, SessionLifecycle, StorageConfig};
//!
//! let config = load_config(&path)?;
//! let storage = StorageConfig::for_project(&project_root)?;
//! let client = ClaudeCli::new(&config, storage.clone())?;
//! let lifecycle = SessionLifecycle::new(storage, &config, client);
//!
//! lifecycle.create_or_resume("Tasks")?;
//! lifecycle.launch("Tasks")?;
//! ```

pub mod claude;
pub mod config;
pub mod error;
pub mod path_utils;
pub mod session;
pub mod storage;
pub mod transcript;
pub mod types;

pub use claude::{ClaudeCli, ClaudeClient, WatcherCommand};
pub use config::{default_config_path, load_config, DiscoveryMode, KamuiConfig, TieBreak};
pub use error::{DiscoveryFailure, KamuiError, Result};
pub use path_utils::{canonical_working_dir, resolve_project_root};
pub use session::{MetadataStore, Prepared, ResumeOutcome, SessionLifecycle, SessionLock};
pub use storage::StorageConfig;
pub use transcript::{
    remove_sentinel, CancelToken, SessionDiscovery, TranscriptEntry, TranscriptScanner,
};
pub use types::{LifecycleState, SessionRecord, StateChange};
