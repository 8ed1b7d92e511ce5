//! End-to-end scenarios driving the MSVC wrapper the way the dispatcher
//! does: resolve arguments, fingerprint, declare outputs, run the compiler
//! on a miss and vet candidate entries on later invocations.

use objcache::command_executor::CommandExecutor;
use objcache::{
    CacheEntry, CommandArguments, CompilerWrapper, CompressionMode, Digest,
    EnvironmentVariables, MissInfo, MsvcWrapper,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn exit_status(code: i32) -> std::process::ExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code as u32)
    }
}

/// Stand-in for cl.exe: "compiles" by writing the configured
/// `/sourceDependencies` reports into the directory the wrapper requested.
struct FakeCompiler {
    /// report file name -> report content
    reports: HashMap<String, String>,
    invocations: Arc<Mutex<usize>>,
}

impl FakeCompiler {
    fn new(reports: HashMap<String, String>) -> (Self, Arc<Mutex<usize>>) {
        let invocations = Arc::new(Mutex::new(0));
        (
            Self {
                reports,
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

impl CommandExecutor for FakeCompiler {
    fn execute_scrubbed(
        &self,
        _cmd: &str,
        args: &CommandArguments,
        scrub_env: &[&str],
    ) -> objcache::Result<std::process::Output> {
        // The wrapper must scrub the variables cl.exe would re-interpret
        assert!(scrub_env.contains(&"CL"));
        assert!(scrub_env.contains(&"_CL_"));
        assert!(scrub_env.contains(&"VS_UNICODE_OUTPUT"));

        *self.invocations.lock().unwrap() += 1;
        if let Some(pos) = args.iter().position(|a| a == "/sourceDependencies") {
            let report_dir = Path::new(&args[pos + 1]);
            assert!(report_dir.is_dir(), "the compiler requires the directory");
            for (name, content) in &self.reports {
                fs::write(report_dir.join(name), content).unwrap();
            }
        }
        Ok(std::process::Output {
            status: exit_status(0),
            stdout: b"foo.cpp\r\n".to_vec(),
            stderr: Vec::new(),
        })
    }
}

fn vs_env() -> EnvironmentVariables {
    let mut env = EnvironmentVariables::new();
    env.insert("VSCMD_ARG_HOST_ARCH", "x64");
    env.insert("VSCMD_ARG_TGT_ARCH", "x64");
    env.insert("VCToolsVersion", "14.29.30133");
    env
}

struct Workspace {
    _temp_dir: TempDir,
    source: String,
    user_header: std::path::PathBuf,
    env: EnvironmentVariables,
    argv: Vec<String>,
    reports: HashMap<String, String>,
}

/// A project with one translation unit including a user header and a
/// "system" header that INCLUDE covers
fn workspace() -> Workspace {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    let source = root.join("foo.cpp");
    fs::write(&source, "#include <windows.h>\n#include \"mylib.h\"\n").unwrap();

    let system_dir = root.join("system");
    fs::create_dir(&system_dir).unwrap();
    let system_header = system_dir.join("windows.h");
    fs::write(&system_header, "// system header\n").unwrap();

    let user_header = root.join("mylib.h");
    fs::write(&user_header, "#define ANSWER 42\n").unwrap();

    let build_dir = root.join("build");
    fs::create_dir(&build_dir).unwrap();

    let mut env = vs_env();
    env.insert("INCLUDE", system_dir.display().to_string());

    let source_path = source.display().to_string();
    let argv = vec![
        "cl".to_string(),
        "/c".to_string(),
        source_path.clone(),
        format!("/Fo:{}/", build_dir.display()),
    ];

    let report = serde_json::json!({
        "Version": "1.0",
        "Data": {
            "Includes": [
                system_header.display().to_string(),
                user_header.display().to_string(),
            ],
        },
    });
    let mut reports = HashMap::new();
    reports.insert("foo.cpp.json".to_string(), report.to_string());

    Workspace {
        _temp_dir: temp_dir,
        source: source_path,
        user_header,
        env,
        argv,
        reports,
    }
}

fn build_wrapper(ws: &Workspace) -> (MsvcWrapper, Arc<Mutex<usize>>) {
    let (compiler, invocations) = FakeCompiler::new(ws.reports.clone());
    let wrapper = MsvcWrapper::with_executor(
        CommandArguments::from_vec(ws.argv.clone()),
        ws.env.clone(),
        Box::new(compiler),
    );
    (wrapper, invocations)
}

#[test]
fn simple_build_then_hit_then_invalidate() {
    let ws = workspace();

    // --- First invocation: clean cache, miss path ---
    let (mut wrapper, invocations) = build_wrapper(&ws);
    assert!(wrapper.can_handle_command());
    wrapper.resolve_args().unwrap();

    let sources = wrapper.preprocess_source().unwrap();
    assert_eq!(sources.len(), 1);
    // Direct mode: effective type tag prepended to the raw bytes
    assert!(sources[&ws.source].starts_with(b"cpp#include"));

    let build_files = wrapper.build_files(&ws.source).unwrap();
    assert!(build_files["object"].path().ends_with("build/foo.obj"));

    let mut misses = vec![MissInfo::new(ws.source.clone(), build_files)];
    let result = wrapper.run_for_miss(&mut misses).unwrap();
    assert_eq!(result.return_code, 0);
    assert_eq!(*invocations.lock().unwrap(), 1);

    // The system header is filtered out of the dependency records
    let user_header_path = ws.user_header.display().to_string();
    assert_eq!(
        misses[0].dependencies.keys().collect::<Vec<_>>(),
        [&user_header_path]
    );

    // The dispatcher stores the entry; round-trip it like the backend does
    let entry = CacheEntry::new(
        vec!["object-blob".to_string()],
        misses[0].dependencies.clone(),
        CompressionMode::All,
        result.std_out,
        result.std_err,
        result.return_code,
    );
    let entry = CacheEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    // --- Second invocation: identical state, warm hit ---
    let (mut second, second_invocations) = build_wrapper(&ws);
    second.resolve_args().unwrap();
    assert!(second.filter_cache_hit(&entry));
    // The compiler was never spawned on the hit path
    assert_eq!(*second_invocations.lock().unwrap(), 0);

    // --- Third invocation: header edited, candidate rejected ---
    fs::write(&ws.user_header, "#define ANSWER 43\n").unwrap();
    let (mut third, third_invocations) = build_wrapper(&ws);
    third.resolve_args().unwrap();
    assert!(!third.filter_cache_hit(&entry));

    let build_files = third.build_files(&ws.source).unwrap();
    let mut misses = vec![MissInfo::new(ws.source.clone(), build_files)];
    third.run_for_miss(&mut misses).unwrap();
    assert_eq!(*third_invocations.lock().unwrap(), 1);
    assert_ne!(
        misses[0].dependencies[&user_header_path],
        entry.dependency_records()[&user_header_path]
    );
    assert_eq!(
        misses[0].dependencies[&user_header_path],
        Digest::from_file(&ws.user_header).unwrap()
    );
}

#[test]
fn tlog_records_are_emitted_for_tracked_builds() {
    let mut ws = workspace();
    let tlog_dir = TempDir::new().unwrap();
    ws.env.insert("TRACKER_ENABLED", "1");
    ws.env
        .insert("TRACKER_INTERMEDIATE", tlog_dir.path().display().to_string());
    ws.env.insert("TRACKER_TOOLCHAIN", "CL");

    let (mut wrapper, _) = build_wrapper(&ws);
    wrapper.resolve_args().unwrap();

    let build_files = wrapper.build_files(&ws.source).unwrap();
    let read_log = build_files["tlog_r"].path().to_string();
    let write_log = build_files["tlog_w"].path().to_string();
    assert!(read_log.ends_with("CL.foo_cpp.read.1.tlog"));
    assert!(write_log.ends_with("CL.foo_cpp.write.1.tlog"));
    let object_path = build_files["object"].path().to_string();

    let mut misses = vec![MissInfo::new(ws.source.clone(), build_files)];
    wrapper.run_for_miss(&mut misses).unwrap();

    let read_content = fs::read_to_string(&read_log).unwrap();
    let lines: Vec<&str> = read_content.split("\r\n").collect();
    assert_eq!(lines[0], format!("^{}", ws.source.to_uppercase()));
    assert_eq!(lines[1], ws.source.to_uppercase());
    assert!(lines.contains(&ws.user_header.display().to_string().to_uppercase().as_str()));
    assert_eq!(*lines.last().unwrap(), object_path.to_uppercase());

    let write_content = fs::read_to_string(&write_log).unwrap();
    assert_eq!(
        write_content,
        format!(
            "^{}\r\n{}",
            ws.source.to_uppercase(),
            object_path.to_uppercase()
        )
    );
}

#[test]
fn response_file_with_utf16_bom_is_inlined() {
    let temp_dir = TempDir::new().unwrap();
    let rsp = temp_dir.path().join("opts.rsp");
    let mut content = vec![0xFF, 0xFE];
    for unit in "/DFOO /Ibar".encode_utf16() {
        content.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(&rsp, content).unwrap();

    let source = temp_dir.path().join("foo.cpp");
    fs::write(&source, "int main() { return 0; }\n").unwrap();

    let (compiler, _) = FakeCompiler::new(HashMap::new());
    let mut wrapper = MsvcWrapper::with_executor(
        CommandArguments::from_vec(vec![
            "cl".to_string(),
            "/c".to_string(),
            format!("@{}", rsp.display()),
            source.display().to_string(),
        ]),
        vs_env(),
        Box::new(compiler),
    );
    wrapper.resolve_args().unwrap();

    let args = wrapper.relevant_arguments().unwrap().into_inner();
    assert!(args.contains(&"/Ibar".to_string()));
    let define_pos = args.iter().position(|a| a == "/D").unwrap();
    assert_eq!(args[define_pos + 1], "FOO");
}

#[test]
fn multiple_inputs_need_a_directory_object_path() {
    let (compiler, _) = FakeCompiler::new(HashMap::new());
    let mut wrapper = MsvcWrapper::with_executor(
        CommandArguments::from_vec(vec![
            "cl".to_string(),
            "/c".to_string(),
            "a.cpp".to_string(),
            "b.cpp".to_string(),
            "/Fo:out.obj".to_string(),
        ]),
        vs_env(),
        Box::new(compiler),
    );
    let err = wrapper.resolve_args().unwrap_err();
    assert!(err.disables_caching());
}

#[test]
fn separate_pdb_debug_format_is_rejected_with_advice() {
    let (compiler, _) = FakeCompiler::new(HashMap::new());
    let mut wrapper = MsvcWrapper::with_executor(
        CommandArguments::from_vec(vec![
            "cl".to_string(),
            "/c".to_string(),
            "/Zi".to_string(),
            "foo.cpp".to_string(),
        ]),
        vs_env(),
        Box::new(compiler),
    );
    let err = wrapper.resolve_args().unwrap_err();
    assert!(err.disables_caching());
    assert!(err.to_string().contains("/Z7"));
}
