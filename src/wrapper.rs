//! The contract between compiler wrappers and the external dispatcher.
//!
//! The dispatcher owns the cache-key digest and the storage backend; a
//! wrapper contributes the compiler-specific pieces: identifying the
//! compiler, producing the fingerprint inputs, declaring outputs, vetting
//! candidate hits and running the real compiler on a miss.

use crate::entry::CacheEntry;
use crate::errors::Result;
use crate::hashing::DependencyRecords;
use crate::types::{BuildFiles, CommandArguments};
use std::collections::BTreeMap;

/// One input file the dispatcher found no valid cache entry for
#[derive(Debug, Clone, Default)]
pub struct MissInfo {
    /// Input source path, as it appeared on the command line
    pub source: String,
    /// Outputs this input will produce, from
    /// [`CompilerWrapper::build_files`]
    pub build_files: BuildFiles,
    /// Filled by [`CompilerWrapper::run_for_miss`]: the dependencies the
    /// compiler reported, with their content digests
    pub dependencies: DependencyRecords,
}

impl MissInfo {
    #[must_use]
    pub fn new(source: impl Into<String>, build_files: BuildFiles) -> Self {
        Self {
            source: source.into(),
            build_files,
            dependencies: DependencyRecords::new(),
        }
    }
}

/// Outcome of running the wrapped command
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub std_out: Vec<u8>,
    pub std_err: Vec<u8>,
    pub return_code: i32,
}

/// A compiler-specific wrapper implementation.
///
/// Call order for one invocation: `can_handle_command`, `resolve_args`,
/// then the fingerprint methods in any order, `build_files` per input,
/// `filter_cache_hit` per candidate entry, and `run_for_miss` once if any
/// input remains unserved.
pub trait CompilerWrapper {
    /// Check if this wrapper handles the given command
    fn can_handle_command(&self) -> bool;

    /// Parse and validate the command line. Fails with a configuration
    /// error when the invocation shape is not cacheable; the dispatcher
    /// then runs the compiler directly.
    fn resolve_args(&mut self) -> Result<()>;

    /// Capabilities are opt-in; an empty list means none are supported.
    /// Known strings: `hard_links` (cached files may be hard-linked into
    /// place).
    fn capabilities(&self) -> Vec<String>;

    /// Per-input preprocessed-source surrogate keyed by input path; one of
    /// the four fingerprint components
    fn preprocess_source(&mut self) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Command line arguments that affect the output, in canonical order
    fn relevant_arguments(&self) -> Result<CommandArguments>;

    /// Environment variables that affect the output
    fn relevant_env_vars(&self) -> Result<BTreeMap<String, String>>;

    /// A string that uniquely identifies the program producing the outputs
    fn program_id(&self) -> Result<String>;

    /// The files the command will generate for the given input
    fn build_files(&self, key: &str) -> Result<BuildFiles>;

    /// Final say on a candidate entry: returns false when any recorded
    /// dependency no longer matches its digest
    fn filter_cache_hit(&mut self, entry: &CacheEntry) -> bool;

    /// Run the real compiler for the inputs that missed, filling each
    /// [`MissInfo::dependencies`]
    fn run_for_miss(&mut self, miss_infos: &mut [MissInfo]) -> Result<RunResult>;
}
