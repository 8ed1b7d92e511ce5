//! Bridge to the host build system's file tracking.
//!
//! MSBuild tracks the files a tool touches through an injected FileTracker
//! library and consults per-tool `.tlog` files for incremental builds. While
//! the cache is doing its own work (hashing inputs, restoring outputs) that
//! tracking must be suspended, or the intermediate accesses would poison the
//! build system's view. In exchange, the cache emits equivalent tlog records
//! for the compiles it handles so incremental builds keep working.

use crate::errors::{Error, Result};
use crate::paths;
use crate::types::{BuildFiles, EnvironmentVariables, ExpectedFile};
use std::path::Path;
use tracing::debug;

const ENV_TRACKER_ENABLED: &str = "TRACKER_ENABLED";
const ENV_TRACKER_INTERMEDIATE: &str = "TRACKER_INTERMEDIATE";
const ENV_TRACKER_TOOLCHAIN: &str = "TRACKER_TOOLCHAIN";

fn env_truthy(value: Option<&String>) -> bool {
    match value {
        None => false,
        Some(value) => {
            let value = value.trim().to_ascii_lowercase();
            !(value.is_empty()
                || value == "0"
                || value == "false"
                || value == "no"
                || value == "off")
        }
    }
}

/// Make a path absolute and upper-case it, the form tlog payloads use.
/// Drive-letter and UNC paths count as absolute on any host.
fn full_path_upper(path: &str) -> String {
    let looks_absolute = Path::new(path).is_absolute()
        || path.as_bytes().get(1) == Some(&b':')
        || path.starts_with('\\');
    let absolute = if looks_absolute {
        path.to_string()
    } else {
        match std::env::current_dir() {
            Ok(dir) => dir.join(path).display().to_string(),
            Err(_) => path.to_string(),
        }
    };
    absolute.to_uppercase()
}

#[cfg(windows)]
mod host {
    use once_cell::sync::Lazy;

    type TrackingFn = unsafe extern "system" fn() -> i32;

    struct TrackerApi {
        suspend: libloading::os::windows::Symbol<TrackingFn>,
        resume: libloading::os::windows::Symbol<TrackingFn>,
        // Keeps the module reference alive for the symbols above
        _library: libloading::os::windows::Library,
    }

    // The FileTracker API is documented on MSDN; the entry points are only
    // present when MSBuild injected the library into this process.
    static API: Lazy<Option<TrackerApi>> = Lazy::new(|| {
        let enabled = std::env::var(super::ENV_TRACKER_ENABLED).ok();
        if !super::env_truthy(enabled.as_ref()) {
            return None;
        }
        for module in ["FileTracker64", "FileTracker32", "FileTracker"] {
            let Ok(library) = libloading::os::windows::Library::open_already_loaded(module)
            else {
                continue;
            };
            let suspend = unsafe { library.get(b"SuspendTracking\0") };
            let resume = unsafe { library.get(b"ResumeTracking\0") };
            if let (Ok(suspend), Ok(resume)) = (suspend, resume) {
                return Some(TrackerApi {
                    suspend,
                    resume,
                    _library: library,
                });
            }
            return None;
        }
        None
    });

    pub(super) fn suspend() {
        if let Some(api) = API.as_ref() {
            unsafe {
                let _ = (*api.suspend)();
            }
        }
    }

    pub(super) fn resume() {
        if let Some(api) = API.as_ref() {
            unsafe {
                let _ = (*api.resume)();
            }
        }
    }
}

#[cfg(not(windows))]
mod host {
    pub(super) fn suspend() {}
    pub(super) fn resume() {}
}

/// Suspends host file tracking for the lifetime of the guard.
///
/// The underlying Suspend/Resume calls are not reference-counted (whichever
/// was called last is the effective state), so nested guards are forbidden:
/// the process owns exactly one, engaged at startup and dropped at exit.
pub struct TrackerSuppressor {
    _private: (),
}

impl TrackerSuppressor {
    #[must_use]
    pub fn engage() -> Self {
        debug!("suspending host file tracking");
        host::suspend();
        Self { _private: () }
    }
}

impl Drop for TrackerSuppressor {
    fn drop(&mut self) {
        debug!("resuming host file tracking");
        host::resume();
    }
}

/// Re-enable tracking immediately, without waiting for the suppressor to
/// drop. Used before falling back to a direct compiler invocation whose
/// file accesses must be seen by the build system.
pub fn release_suppression() {
    debug!("releasing file tracking suppression");
    host::resume();
}

/// Emits per-input tlog records matching MSBuild's format.
///
/// Records are written per input file so they can be cached per file;
/// MSBuild merges them automatically.
#[derive(Debug, Clone, Default)]
pub struct TrackingLog {
    enabled: bool,
    intermediate_dir: String,
    toolchain: String,
    sources: Vec<String>,
    root: String,
}

impl TrackingLog {
    #[must_use]
    pub fn from_env(env: &EnvironmentVariables) -> Self {
        let enabled = env_truthy(env.get(ENV_TRACKER_ENABLED));
        if !enabled {
            return Self::default();
        }
        Self {
            enabled,
            intermediate_dir: env.get(ENV_TRACKER_INTERMEDIATE).cloned().unwrap_or_default(),
            toolchain: env.get(ENV_TRACKER_TOOLCHAIN).cloned().unwrap_or_default(),
            sources: Vec::new(),
            root: String::new(),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The tlog pair this input file will produce
    #[must_use]
    pub fn build_files(&self, filename: &str) -> BuildFiles {
        if !self.enabled {
            return BuildFiles::new();
        }
        let basename = paths::file_name(filename).replace('.', "_");
        let read_name = format!("{}.{}.read.1.tlog", self.toolchain, basename);
        let write_name = format!("{}.{}.write.1.tlog", self.toolchain, basename);
        let dir = Path::new(&self.intermediate_dir);
        let mut files = BuildFiles::new();
        files.insert(
            "tlog_r".to_string(),
            ExpectedFile::new(dir.join(read_name).display().to_string(), true),
        );
        files.insert(
            "tlog_w".to_string(),
            ExpectedFile::new(dir.join(write_name).display().to_string(), true),
        );
        files
    }

    /// Record a source participating in this invocation. Must happen before
    /// [`TrackingLog::finalize_sources`].
    pub fn add_source(&mut self, path: &str) {
        if !self.enabled {
            return;
        }
        self.sources.push(full_path_upper(path));
    }

    /// Compute the root line shared by every log of this invocation
    pub fn finalize_sources(&mut self) {
        if !self.enabled {
            return;
        }
        self.sources.sort();
        self.root = format!("^{}", self.sources.join("|"));
    }

    /// Write the read/write tlog pair for one input file.
    ///
    /// `dependencies` are expected to be absolute paths already, but not
    /// necessarily upper case.
    pub fn write_logs(
        &self,
        source: &str,
        build_files: &BuildFiles,
        dependencies: &[String],
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let object_file = build_files
            .get("object")
            .ok_or_else(|| Error::invalid_input("tlog emission requires an object output"))?;
        let object_path = full_path_upper(object_file.path());

        let read_log = build_files
            .get("tlog_r")
            .ok_or_else(|| Error::invalid_input("missing read tlog output"))?;
        let mut lines = vec![self.root.clone(), full_path_upper(source)];
        lines.extend(dependencies.iter().cloned());
        lines.push(object_path.clone());
        std::fs::write(read_log.path(), lines.join("\r\n").to_uppercase())
            .map_err(|e| Error::file_system(read_log.path(), "write tlog", e))?;

        let write_log = build_files
            .get("tlog_w")
            .ok_or_else(|| Error::invalid_input("missing write tlog output"))?;
        let mut lines = vec![self.root.clone()];
        if let Some(pch) = build_files.get("pch") {
            lines.push(pch.path().to_string());
        }
        lines.push(object_path);
        std::fs::write(write_log.path(), lines.join("\r\n"))
            .map_err(|e| Error::file_system(write_log.path(), "write tlog", e))?;
        Ok(())
    }
}
