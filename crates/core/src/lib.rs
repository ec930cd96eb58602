//! MergePort core library.
//!
//! This crate provides the components for propagating a change from one
//! branch to another across two version-control backends: descriptor parsing,
//! the remote work queue and its status state machine, the versioned
//! rename-resolution engine, diff classification, the sparse working-copy
//! builder, and the two merge pipelines (SVN revision-range and Git commit).

pub mod config;
pub mod descriptor;
pub mod errors;
pub mod git;
pub mod lookup;
pub mod pipeline;
pub mod queue;
pub mod resolve;
pub mod svn;
pub mod version;

// Re-exports for convenience.
pub use config::AppConfig;
pub use descriptor::{GitDescriptor, MergeDescriptor, Status, SvnDescriptor};
pub use lookup::LookupStore;
pub use queue::{QueueFolder, RemoteQueue};
pub use resolve::RenameResolver;
pub use version::Version;
