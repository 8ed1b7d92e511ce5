//! Parser for the subset of `cl.exe` command line syntax needed to extract
//! cache-relevant state and rewrite the compilation command.
//!
//! cl.exe prepends the `CL` environment variable and appends `_CL_` to the
//! command line it interprets, and inlines `@file` response files; `parse`
//! reproduces all of that so the resulting state matches what the compiler
//! would actually see. The parsed state can be re-emitted selectively via
//! [`CmdlineParser::merge`] with a fixed total ordering, which is what makes
//! the emitted vector usable as a fingerprint component.
//!
//! Note that cl.exe options may implicitly modify other related option
//! state, and these behaviors can change between compiler versions. Only
//! the options that affect caching are interpreted; everything else is
//! recorded verbatim and re-emitted as-is.

use crate::errors::{Error, Result};
use crate::paths;
use crate::types::{CommandArguments, EnvironmentVariables};
use std::fs;

/// cl.exe prepends/appends contents of these variables to the command line
/// it interprets.
pub(crate) const ENV_CL_PREFIX: &str = "CL";
pub(crate) const ENV_CL_POSTFIX: &str = "_CL_";

/// The actual nesting limit used by cl.exe is unknown; this is far above
/// anything a real build produces.
const MAX_COMMAND_FILE_DEPTH: u32 = 100;

/// Language kind of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputType {
    #[default]
    Unknown,
    Object,
    C,
    Cpp,
}

/// Infer the input type from the file extension, the way cl.exe does when
/// no `/Tc`/`/Tp`/`/TC`/`/TP` selector applies
fn filename_to_type(name: &str) -> InputType {
    let ext = paths::extension(name).to_ascii_lowercase();
    match ext.as_str() {
        ".c" => InputType::C,
        ".cpp" | ".cxx" | ".cc" => InputType::Cpp,
        _ => InputType::Object,
    }
}

/// An input file together with the type its command line form declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub kind: InputType,
}

impl InputFile {
    /// Render back into the command line form that declared it
    #[must_use]
    pub fn as_arg(&self) -> String {
        match self.kind {
            InputType::C => format!("/Tc{}", self.name),
            InputType::Cpp => format!("/Tp{}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Where debug information goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugFormat {
    #[default]
    None,
    /// `/Z7`: embedded in the object file
    ObjectFile,
    /// `/Zi`: separate PDB file
    SeparateFile,
    /// `/ZI`: separate PDB file with edit-and-continue
    SeparateFileEditAndContinue,
}

/// Field selection for [`CmdlineParser::merge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Every field including input files
    All,
    /// Everything except includes, defines and the object path, which a
    /// preprocessor pass would subsume. Reserved for preprocessor mode.
    SkipCoveredByPreprocess,
    /// Everything except the input-type selector and the input files: the
    /// per-input type tag and content stand in for those when
    /// fingerprinting in direct mode.
    DirectModeCommonArgs,
    /// Everything except input files; used to re-invoke the compiler for
    /// specific misses.
    SkipInputs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FlagOption {
    enabled: bool,
    value: String,
}

/// Precompiled header state.
///
/// `create`, `use` and `ignore` are independent because real command lines
/// present contradictory combinations; `ignore` wins over `create`, and
/// create/use exclusion is left for the compiler to diagnose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PchConfig {
    create: FlagOption,
    use_: FlagOption,
    path: String,
    ignore: bool,
}

impl PchConfig {
    #[must_use]
    pub fn is_create(&self) -> bool {
        if self.ignore {
            return false;
        }
        self.create.enabled
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the path the compiler will write the PCH to
    #[must_use]
    pub fn output_path(&self, input_file: &str, default_name: &str) -> String {
        if self.path.is_empty() {
            paths::change_extension(input_file, ".pch")
        } else if paths::ends_with_separator(&self.path) {
            // The pch path is a directory; formulate the default filename
            format!("{}{}", self.path, default_name)
        } else {
            paths::change_extension(&self.path, ".pch")
        }
    }
}

/// Mutable parse state for one `cl.exe` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdlineParser {
    command_file_depth: u32,
    compile_only: bool,
    default_input_type: InputType,
    debug_format: DebugFormat,
    includes: Vec<String>,
    defines: Vec<String>,
    options: Vec<String>,
    pdb_path: String,
    object_path: String,
    pch_config: PchConfig,
    input_files: Vec<InputFile>,
}

impl Default for CmdlineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CmdlineParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            command_file_depth: 0,
            compile_only: false,
            default_input_type: InputType::Object,
            debug_format: DebugFormat::None,
            includes: Vec::new(),
            defines: Vec::new(),
            options: Vec::new(),
            pdb_path: String::new(),
            object_path: String::new(),
            pch_config: PchConfig::default(),
            input_files: Vec::new(),
        }
    }

    /// Consume a full argument vector, including the `CL` fragment before it
    /// and the `_CL_` fragment after it
    pub fn parse(&mut self, argv: &CommandArguments, env: &EnvironmentVariables) -> Result<()> {
        if let Some(fragment) = env.get(ENV_CL_PREFIX) {
            self.parse_line(fragment)?;
        }
        if argv.len() > 1 {
            self.parse_list(&argv[1..])?;
        }
        if let Some(fragment) = env.get(ENV_CL_POSTFIX) {
            self.parse_line(fragment)?;
        }
        Ok(())
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        self.parse_list(&split_args(line))
    }

    fn parse_file(&mut self, name: &str) -> Result<()> {
        self.command_file_depth += 1;
        if self.command_file_depth > MAX_COMMAND_FILE_DEPTH {
            return Err(Error::invalid_input(format!(
                "command file nesting deeper than {MAX_COMMAND_FILE_DEPTH} levels"
            )));
        }
        let text = read_command_file(name)?;
        for line in text.lines() {
            self.parse_line(line)?;
        }
        self.command_file_depth -= 1;
        Ok(())
    }

    fn parse_list(&mut self, list: &[String]) -> Result<()> {
        let mut it = list.iter();
        while let Some(item) = it.next() {
            let Some(option) = get_option(item) else {
                if let Some(command_file) = item.strip_prefix('@') {
                    // Inline the file; the command-file option itself is not
                    // tracked
                    self.parse_file(command_file)?;
                } else {
                    self.append_file(item.clone(), InputType::Unknown);
                }
                continue;
            };

            if option == "link" {
                // /link hands the rest of this fragment to the linker
                break;
            } else if option == "c" {
                self.compile_only = true;
            } else if let Some(rest) = option.strip_prefix('D') {
                let define = retrieve_arg(option, rest, false, &mut it)?;
                self.defines.push(define);
            } else if let Some(rest) = option.strip_prefix("Fd") {
                self.pdb_path = sanitize_path(retrieve_arg(option, rest, true, &mut it)?);
            } else if let Some(rest) = option.strip_prefix("Fo") {
                self.object_path = sanitize_path(retrieve_arg(option, rest, true, &mut it)?);
            } else if let Some(rest) = option.strip_prefix("Fp") {
                self.pch_config.path = sanitize_path(retrieve_arg(option, rest, true, &mut it)?);
            } else if let Some(rest) = option.strip_prefix('I') {
                let include = sanitize_path(retrieve_arg(option, rest, false, &mut it)?);
                self.includes.push(include);
            } else if option == "TC" {
                self.default_input_type = InputType::C;
            } else if option == "TP" {
                self.default_input_type = InputType::Cpp;
            } else if let Some(rest) = option.strip_prefix("Tc") {
                let file = sanitize_path(retrieve_arg(option, rest, false, &mut it)?);
                self.append_file(file, InputType::C);
            } else if let Some(rest) = option.strip_prefix("Tp") {
                let file = sanitize_path(retrieve_arg(option, rest, false, &mut it)?);
                self.append_file(file, InputType::Cpp);
            } else if option == "Y-" {
                self.pch_config.ignore = true;
            } else if let Some(rest) = option.strip_prefix("Yc") {
                self.pch_config.create = FlagOption {
                    enabled: true,
                    value: sanitize_path(rest.to_string()),
                };
            } else if let Some(rest) = option.strip_prefix("Yu") {
                self.pch_config.use_ = FlagOption {
                    enabled: true,
                    value: sanitize_path(rest.to_string()),
                };
            } else if option == "Z7" {
                self.debug_format = DebugFormat::ObjectFile;
            } else if option == "Zi" {
                self.debug_format = DebugFormat::SeparateFile;
            } else if option == "ZI" {
                self.debug_format = DebugFormat::SeparateFileEditAndContinue;
            } else {
                // Not something we specially handle
                self.options.push(option.to_string());
            }
        }
        Ok(())
    }

    fn append_file(&mut self, name: String, kind: InputType) {
        self.input_files.push(InputFile { name, kind });
    }

    /// Re-emit parsed state as a canonical argument vector.
    ///
    /// The emission order is fixed so the result is stable across
    /// processes; fingerprints depend on this.
    #[must_use]
    pub fn merge(&self, mode: MergeMode) -> CommandArguments {
        let mut cmdline = CommandArguments::new();
        if self.compile_only {
            cmdline.push("/c");
        }
        if mode != MergeMode::DirectModeCommonArgs {
            match self.default_input_type {
                InputType::C => cmdline.push("/TC"),
                InputType::Cpp => cmdline.push("/TP"),
                _ => {}
            }
        }
        match self.debug_format {
            DebugFormat::ObjectFile => cmdline.push("/Z7"),
            DebugFormat::SeparateFile => cmdline.push("/Zi"),
            DebugFormat::SeparateFileEditAndContinue => cmdline.push("/ZI"),
            DebugFormat::None => {}
        }
        for option in &self.options {
            cmdline.push(format!("/{option}"));
        }
        if !self.pdb_path.is_empty() {
            cmdline.push(format!("/Fd:{}", self.pdb_path));
        }
        if mode != MergeMode::SkipCoveredByPreprocess {
            for include in &self.includes {
                cmdline.push(format!("/I{include}"));
            }
            for define in &self.defines {
                cmdline.push("/D");
                cmdline.push(define.clone());
            }
            if !self.object_path.is_empty() {
                cmdline.push(format!("/Fo:{}", self.object_path));
            }
        }
        if self.pch_config.create.enabled {
            cmdline.push(format!("/Yc{}", self.pch_config.create.value));
        }
        if self.pch_config.use_.enabled {
            cmdline.push(format!("/Yu{}", self.pch_config.use_.value));
        }
        if self.pch_config.ignore {
            cmdline.push("/Y-");
        }
        if !self.pch_config.path.is_empty() {
            cmdline.push(format!("/Fp:{}", self.pch_config.path));
        }
        if mode == MergeMode::All {
            for file in &self.input_files {
                cmdline.push(file.as_arg());
            }
        }
        cmdline
    }

    /// Type the compiler will treat the file as
    #[must_use]
    pub fn effective_file_type(&self, file: &InputFile) -> InputType {
        if file.kind != InputType::Unknown {
            return file.kind;
        }
        match self.default_input_type {
            InputType::C | InputType::Cpp => self.default_input_type,
            _ => filename_to_type(&file.name),
        }
    }

    pub fn input_file_by_name(&self, name: &str) -> Result<&InputFile> {
        self.input_files
            .iter()
            .find(|file| file.name == name)
            .ok_or_else(|| Error::invalid_input(format!("no such input file: {name}")))
    }

    /// An empty object path means the current directory, which also counts
    /// as a directory
    #[must_use]
    pub fn obj_path_is_dir(&self) -> bool {
        self.object_path.is_empty() || paths::ends_with_separator(&self.object_path)
    }

    #[must_use]
    pub fn compile_only(&self) -> bool {
        self.compile_only
    }

    #[must_use]
    pub fn default_input_type(&self) -> InputType {
        self.default_input_type
    }

    #[must_use]
    pub fn debug_format(&self) -> DebugFormat {
        self.debug_format
    }

    #[must_use]
    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    #[must_use]
    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn pdb_path(&self) -> &str {
        &self.pdb_path
    }

    #[must_use]
    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    #[must_use]
    pub fn pch_config(&self) -> &PchConfig {
        &self.pch_config
    }

    #[must_use]
    pub fn input_files(&self) -> &[InputFile] {
        &self.input_files
    }
}

/// A token is an option iff it begins with `/` or `-`
fn get_option(item: &str) -> Option<&str> {
    item.strip_prefix(['/', '-'])
}

/// Resolve an option's argument.
///
/// `option` is the full option body (for diagnostics), `body` the part after
/// the option name. Some cl.exe arguments can be given with an optional
/// colon separator (both `/Fooutput.obj` and `/Fo:output.obj` are valid),
/// and when the option supports the colon but neither form carries a value
/// the argument must not come from the next token.
fn retrieve_arg(
    option: &str,
    body: &str,
    uses_colon: bool,
    it: &mut std::slice::Iter<'_, String>,
) -> Result<String> {
    let arg = if uses_colon {
        body.strip_prefix(':').unwrap_or(body)
    } else {
        body
    };
    if !arg.is_empty() {
        return Ok(arg.to_string());
    }
    if uses_colon {
        return Err(Error::invalid_input(format!(
            "option '/{option}' expects an argument"
        )));
    }
    it.next().cloned().ok_or_else(|| {
        Error::invalid_input(format!("option '/{option}' expects an argument"))
    })
}

/// Normalize a leading drive letter to upper case. This improves the cache
/// hit rate only; it is not required for proper operation.
fn sanitize_path(path: String) -> String {
    let bytes = path.as_bytes();
    if path.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let (drive, rest) = path.split_at(1);
        return format!("{}{}", drive.to_ascii_uppercase(), rest);
    }
    path
}

/// Split one command line into argument tokens.
///
/// Whitespace separates tokens; double quotes group (and are stripped), a
/// backslash-escaped quote is literal, and adjacent quoted and unquoted
/// runs concatenate into one token.
#[must_use]
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut in_quote = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
                has_token = true;
            }
            '"' => {
                in_quote = !in_quote;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quote => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Read a response file, honoring a UTF-16-LE or UTF-8 byte order mark
fn read_command_file(path: &str) -> Result<String> {
    let data = fs::read(path).map_err(|e| Error::file_system(path, "read command file", e))?;
    if data.len() > 2 && data.len() % 2 == 0 && data[0] == 0xFF && data[1] == 0xFE {
        let units: Vec<u16> = data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| {
            Error::invalid_input(format!("command file '{path}' is not valid UTF-16"))
        })
    } else if let Some(stripped) = data.strip_prefix(&[0xEF, 0xBB, 0xBF][..]) {
        String::from_utf8(stripped.to_vec())
            .map_err(|_| Error::invalid_input(format!("command file '{path}' is not valid UTF-8")))
    } else {
        String::from_utf8(data)
            .map_err(|_| Error::invalid_input(format!("command file '{path}' is not valid UTF-8")))
    }
}
