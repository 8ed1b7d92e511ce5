//! Compile-invocation cache core for MSVC (`cl.exe`).
//!
//! The crate intercepts a compiler invocation, computes the inputs that
//! uniquely identify it (arguments, environment, type-tagged source bytes),
//! and lets an external dispatcher either restore previously recorded build
//! artifacts or run the real compiler and record the fresh results.
//!
//! The dispatcher, the content-addressed storage backend, and the hashing of
//! the final cache key live outside this crate; the seam between them and the
//! compiler-specific logic is the [`wrapper::CompilerWrapper`] trait.

pub mod cmdline;
pub mod command_executor;
pub mod entry;
pub mod errors;
pub mod filetracker;
pub mod hashing;
pub mod msvc;
mod paths;
pub mod types;
pub mod version;
pub mod wrapper;

pub use cmdline::{CmdlineParser, DebugFormat, InputFile, InputType, MergeMode};
pub use entry::{CacheEntry, CompressionMode};
pub use errors::{Error, Result};
pub use hashing::{DependencyDigests, DependencyRecords, Digest};
pub use msvc::MsvcWrapper;
pub use types::{BuildFiles, CommandArguments, EnvironmentVariables, ExpectedFile};
pub use version::{ToolVersion, Version};
pub use wrapper::{CompilerWrapper, MissInfo, RunResult};
