//! Wrapper for MS Visual C++ (`cl.exe`) invocations.
//!
//! Fingerprinting runs in "direct mode": instead of preprocessing each
//! input, the fingerprint covers the raw input bytes tagged with the
//! effective language type, the canonical common arguments, the `INCLUDE`
//! environment and a program id derived from the toolchain version. After a
//! miss the compiler's `/sourceDependencies` report supplies the header
//! dependencies, whose digests are recorded in the cache entry and
//! re-checked on every subsequent hit.

use crate::cmdline::{CmdlineParser, DebugFormat, InputType, MergeMode};
use crate::cmdline::{ENV_CL_POSTFIX, ENV_CL_PREFIX};
use crate::command_executor::{CommandExecutor, SystemCommandExecutor};
use crate::entry::CacheEntry;
use crate::errors::{Error, Result};
use crate::filetracker::TrackingLog;
use crate::hashing::{DependencyDigests, DependencyRecords, Digest};
use crate::paths;
use crate::types::{BuildFiles, CommandArguments, EnvironmentVariables, ExpectedFile};
use crate::version::{ToolVersion, Version};
use crate::wrapper::{CompilerWrapper, MissInfo, RunResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Tick this to a new value if the fingerprint inputs change in a
/// non-backwards-compatible way.
const HASH_VERSION: &str = "1";

/// When cl.exe is started from Visual Studio it sends certain output
/// directly to the IDE process instead of stderr/stdout; the redirection is
/// controlled by this variable and must be scrubbed for capture to work.
const ENV_VS_OUTPUT_REDIRECTION: &str = "VS_UNICODE_OUTPUT";

/// cl.exe searches paths given in this variable for system #includes
const ENV_CL_INCLUDE: &str = "INCLUDE";

/// Above this command line length the arguments are spilled to an `@file`
const RESPONSE_FILE_THRESHOLD: usize = 8000;

/// First toolchain with /sourceDependencies support
const MIN_TOOL_VERSION: Version = Version {
    major: 14,
    minor: 27,
    build: 0,
    qfe: 0,
};

/// The compiler's `/sourceDependencies` report, version 1.0
#[derive(Debug, Deserialize)]
struct SourceDependencies {
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Data")]
    data: DependencyData,
}

#[derive(Debug, Deserialize)]
struct DependencyData {
    #[serde(rename = "PCH")]
    pch: Option<String>,
    #[serde(rename = "Includes")]
    includes: Vec<String>,
}

/// Read the PCH (if any) and every include from a dependency report
fn read_source_dependencies(path: &Path) -> Result<Vec<String>> {
    let data = fs::read(path)
        .map_err(|e| Error::file_system(path.to_path_buf(), "read dependency file", e))?;
    let report: SourceDependencies = serde_json::from_slice(&data).map_err(|e| {
        Error::invalid_input(format!(
            "malformed dependency file '{}': {e}",
            path.display()
        ))
    })?;
    if report.version != "1.0" {
        return Err(Error::invalid_input(format!(
            "unknown dependency file version: {}",
            report.version
        )));
    }
    let mut dependencies = Vec::new();
    if let Some(pch) = report.data.pch {
        dependencies.push(pch);
    }
    dependencies.extend(report.data.includes);
    Ok(dependencies)
}

/// Determine the toolchain identity from vcvars-style environment variables,
/// falling back to parsing the compiler executable's path
/// (`...\<version>\bin\Host<arch>\<arch>\cl.exe`)
fn detect_tool_version(compiler_path: &str, env: &EnvironmentVariables) -> Result<ToolVersion> {
    let parts: Vec<&str> = compiler_path.split(['\\', '/']).collect();
    let count = parts.len();
    let mut path_valid = false;

    let host_arch = if let Some(arch) = env.get("VSCMD_ARG_HOST_ARCH") {
        arch.clone()
    } else if count >= 3 && parts[count - 3].starts_with("Host") {
        path_valid = true;
        parts[count - 3]["Host".len()..].to_string()
    } else {
        String::new()
    };

    let target_arch = if let Some(arch) = env.get("VSCMD_ARG_TGT_ARCH") {
        arch.clone()
    } else if path_valid {
        parts[count - 2].to_string()
    } else {
        String::new()
    };

    if host_arch.is_empty() || target_arch.is_empty() {
        return Err(Error::environment(
            "VSCMD_ARG_HOST_ARCH",
            "failed to determine compiler host/target architecture",
        ));
    }

    let vc_version = if let Some(version) = env.get("VCToolsVersion") {
        Version::parse(version)
    } else if count >= 5 && path_valid {
        Version::parse(parts[count - 5])
    } else {
        return Err(Error::environment(
            "VCToolsVersion",
            "failed to determine VC tools version",
        ));
    };

    Ok(ToolVersion {
        host_arch,
        target_arch,
        vc_version,
    })
}

/// A program wrapper for MS Visual C++.
///
/// Lives for exactly one compiler invocation; the dispatcher drives it
/// through the [`CompilerWrapper`] contract.
pub struct MsvcWrapper {
    args: CommandArguments,
    env: EnvironmentVariables,
    parser: Option<CmdlineParser>,
    tool_version: Option<ToolVersion>,
    tlog: TrackingLog,
    env_include_paths: Vec<String>,
    dependencies: DependencyDigests,
    executor: Box<dyn CommandExecutor>,
}

impl MsvcWrapper {
    #[must_use]
    pub fn new(args: CommandArguments) -> Self {
        Self::with_executor(
            args,
            EnvironmentVariables::capture(),
            Box::new(SystemCommandExecutor),
        )
    }

    /// Construct against an explicit environment snapshot and executor.
    /// This is the seam tests use to substitute a fake compiler.
    #[must_use]
    pub fn with_executor(
        args: CommandArguments,
        env: EnvironmentVariables,
        executor: Box<dyn CommandExecutor>,
    ) -> Self {
        // Version 1.0 of the source dependencies json stores all paths in
        // lowercase with backslash separators. Preprocess INCLUDE so a
        // simple string prefix compare can be used.
        let env_include_paths = env
            .get(ENV_CL_INCLUDE)
            .map(|value| {
                value
                    .split(';')
                    .filter(|path| !path.is_empty())
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();
        let tlog = TrackingLog::from_env(&env);
        Self {
            args,
            env,
            parser: None,
            tool_version: None,
            tlog,
            env_include_paths,
            dependencies: DependencyDigests::new(),
            executor,
        }
    }

    fn command(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    fn parser(&self) -> Result<&CmdlineParser> {
        self.parser
            .as_ref()
            .ok_or_else(|| Error::configuration("arguments have not been resolved"))
    }

    fn tool_version(&self) -> Result<&ToolVersion> {
        self.tool_version
            .as_ref()
            .ok_or_else(|| Error::configuration("tool version has not been resolved"))
    }

    fn is_system_include(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.env_include_paths
            .iter()
            .any(|include_path| path.starts_with(include_path.as_str()))
    }

    /// Execute the compiler, spilling the arguments to a response file when
    /// the command line would be too long. The variables cl.exe treats as
    /// extra command line input are scrubbed from the child: the parsed
    /// arguments already contain their content.
    fn run_with_response_file(&self, args: &CommandArguments) -> Result<RunResult> {
        let scrub = [ENV_CL_PREFIX, ENV_CL_POSTFIX, ENV_VS_OUTPUT_REDIRECTION];
        let cmdline = args.join(" ");
        let output = if cmdline.len() > RESPONSE_FILE_THRESHOLD {
            debug!(bytes = cmdline.len(), "spilling arguments to a response file");
            let mut response_file = tempfile::Builder::new()
                .suffix(".rsp")
                .tempfile()
                .map_err(|e| {
                    Error::file_system(std::env::temp_dir(), "create response file", e)
                })?;
            response_file
                .write_all(cmdline.as_bytes())
                .map_err(|e| Error::file_system(response_file.path(), "write response file", e))?;
            let spilled =
                CommandArguments::from_vec(vec![format!("@{}", response_file.path().display())]);
            self.executor
                .execute_scrubbed(self.command(), &spilled, &scrub)?
        } else {
            self.executor.execute_scrubbed(self.command(), args, &scrub)?
        };
        Ok(RunResult {
            return_code: output.status.code().unwrap_or(-1),
            std_out: output.stdout,
            std_err: output.stderr,
        })
    }
}

impl CompilerWrapper for MsvcWrapper {
    fn can_handle_command(&self) -> bool {
        paths::file_stem(self.command()).to_ascii_lowercase() == "cl"
    }

    fn resolve_args(&mut self) -> Result<()> {
        let mut parser = CmdlineParser::new();
        parser.parse(&self.args, &self.env)?;

        // Only /c is checked here. Other options also inhibit linking, but
        // they represent invocations (such as preprocessed output) that no
        // caching is provided for anyway.
        if !parser.compile_only() {
            return Err(Error::unsupported(
                "link",
                "cannot handle invocation with chained link",
            ));
        }

        // Nothing to compile means nothing to cache
        if parser.input_files().is_empty() {
            return Err(Error::configuration("no input files to compile"));
        }

        // A general command line error, which cl.exe itself rejects too
        if parser.input_files().len() > 1 && !parser.obj_path_is_dir() {
            return Err(Error::configuration(
                "single object file path specified for multiple inputs",
            ));
        }

        // PDB outputs of /Zi and /ZI can contain contents merged from
        // objects of unrelated invocations, so they cannot be cached per
        // compile. Users should switch the debug format to /Z7; forcing the
        // override here would hide the misconfiguration instead.
        if matches!(
            parser.debug_format(),
            DebugFormat::SeparateFile | DebugFormat::SeparateFileEditAndContinue
        ) {
            return Err(Error::configuration(
                "cannot handle invocation with shared pdb file; use /Z7 instead",
            ));
        }

        let tool_version = detect_tool_version(self.command(), &self.env)?;
        if tool_version.vc_version < MIN_TOOL_VERSION {
            return Err(Error::configuration(
                "VC Tools >= 14.27 is required for /sourceDependencies support",
            ));
        }

        self.tool_version = Some(tool_version);
        self.parser = Some(parser);
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        // Hard links are safe with MSVC since it never overwrites already
        // existing output files in place.
        vec!["hard_links".to_string()]
    }

    fn preprocess_source(&mut self) -> Result<BTreeMap<String, Vec<u8>>> {
        let parser = self.parser()?;
        let mut sources = BTreeMap::new();
        for file in parser.input_files() {
            // If only a source filename changed, the cache can still hit and
            // place outputs at the right location. That is acceptable except
            // when the rename would change the language mode the compiler
            // selects, so the effective type is folded into the surrogate.
            let type_name = match parser.effective_file_type(file) {
                InputType::C => "c",
                InputType::Cpp => "cpp",
                InputType::Object => "object",
                InputType::Unknown => "unknown",
            };
            let mut surrogate = type_name.as_bytes().to_vec();
            let content = fs::read(&file.name)
                .map_err(|e| Error::file_system(file.name.clone(), "read input file", e))?;
            surrogate.extend_from_slice(&content);
            sources.insert(file.name.clone(), surrogate);
        }
        Ok(sources)
    }

    fn relevant_arguments(&self) -> Result<CommandArguments> {
        let filtered_args = self.parser()?.merge(MergeMode::DirectModeCommonArgs);
        debug!("filtered arguments: {}", filtered_args.join(" "));
        Ok(filtered_args)
    }

    fn relevant_env_vars(&self) -> Result<BTreeMap<String, String>> {
        // The full, original value of INCLUDE guards against any parsing
        // mistakes on our side.
        let mut env_vars = BTreeMap::new();
        env_vars.insert(
            ENV_CL_INCLUDE.to_string(),
            self.env.get(ENV_CL_INCLUDE).cloned().unwrap_or_default(),
        );
        Ok(env_vars)
    }

    fn program_id(&self) -> Result<String> {
        let tool_version = self.tool_version()?;
        Ok(format!(
            "{HASH_VERSION}{}{}{}",
            tool_version.host_arch,
            tool_version.target_arch,
            tool_version.vc_version.as_string(4)
        ))
    }

    fn build_files(&self, key: &str) -> Result<BuildFiles> {
        let parser = self.parser()?;
        let mut files = BuildFiles::new();

        let object_path = if !parser.obj_path_is_dir() {
            // A non-directory object path implies a single input file; the
            // object name comes from the path instead of the input
            let mut path = parser.object_path().to_string();
            if paths::extension(&path).is_empty() {
                path.push_str(".obj");
            }
            path
        } else {
            // Object file names in a directory are constructed from the
            // input file names
            format!("{}{}.obj", parser.object_path(), paths::file_stem(key))
        };
        files.insert("object".to_string(), ExpectedFile::new(object_path, true));

        if parser.pch_config().is_create() {
            let vc_version = &self.tool_version()?.vc_version;
            let default_name = format!("vc{}0.pch", vc_version.as_string(1));
            files.insert(
                "pch".to_string(),
                ExpectedFile::new(parser.pch_config().output_path(key, &default_name), true),
            );
        }

        for (role, file) in self.tlog.build_files(key) {
            files.insert(role, file);
        }
        Ok(files)
    }

    fn filter_cache_hit(&mut self, entry: &CacheEntry) -> bool {
        for (include, recorded) in entry.dependency_records() {
            let digest = match self.dependencies.get(include) {
                Some(digest) => digest,
                None => match Digest::from_file(Path::new(include)) {
                    Ok(digest) => {
                        // Record it in case another input depends on the
                        // same file
                        self.dependencies.set(include.clone(), digest);
                        digest
                    }
                    Err(e) => {
                        // Dependency gone or unreadable: never use the
                        // cached result
                        debug!("rejecting cache hit, cannot hash '{include}': {e}");
                        return false;
                    }
                },
            };
            if digest != *recorded {
                debug!("rejecting cache hit, '{include}' changed");
                return false;
            }
        }
        true
    }

    fn run_for_miss(&mut self, miss_infos: &mut [MissInfo]) -> Result<RunResult> {
        // Re-run the original command, but only for inputs that missed
        let parser = self
            .parser
            .as_ref()
            .ok_or_else(|| Error::configuration("arguments have not been resolved"))?;
        let mut args = parser.merge(MergeMode::SkipInputs);
        for info in miss_infos.iter() {
            let input = parser.input_file_by_name(&info.source)?;
            args.push(input.as_arg());
            self.tlog.add_source(&info.source);
        }
        self.tlog.finalize_sources();

        // cl.exe only treats the /sourceDependencies argument as a
        // directory if one exists at the given location, so it must be
        // created before the compiler runs.
        let dependency_dir = tempfile::tempdir()
            .map_err(|e| Error::file_system(std::env::temp_dir(), "create dependency dir", e))?;
        args.push("/sourceDependencies");
        args.push(dependency_dir.path().display().to_string());

        let mut result = self.run_with_response_file(&args)?;
        // Pass the compiler's output through to the user, then clear it:
        // cl.exe echoes the compiled file name to stdout, and replaying
        // that from the cache entry on later hits would be wrong.
        let _ = std::io::stdout().write_all(&result.std_out);
        let _ = std::io::stderr().write_all(&result.std_err);
        result.std_out = Vec::new();
        result.std_err = Vec::new();
        if result.return_code != 0 {
            return Ok(result);
        }

        for info in miss_infos.iter_mut() {
            let json_name = format!("{}.json", paths::file_name(&info.source));
            let json_path = dependency_dir.path().join(json_name);
            let source_deps = read_source_dependencies(&json_path)?;

            let mut records = DependencyRecords::new();
            for include in &source_deps {
                // Reuse a digest recorded earlier in this invocation
                if let Some(digest) = self.dependencies.get(include) {
                    records.insert(include.clone(), digest);
                    continue;
                }
                // Compiler-shipped headers are covered by the INCLUDE value
                // in the fingerprint; recording them would bloat the entry
                if self.is_system_include(include) {
                    continue;
                }
                let digest = Digest::from_file(Path::new(include))?;
                records.insert(include.clone(), digest);
                self.dependencies.set(include.clone(), digest);
            }
            info.dependencies = records;

            self.tlog
                .write_logs(&info.source, &info.build_files, &source_deps)?;
        }
        Ok(result)
    }
}
