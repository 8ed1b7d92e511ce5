//! String-level path helpers.
//!
//! Compiler command lines carry Windows-style paths that must be manipulated
//! textually on any host, so these helpers treat both `\` and `/` as
//! separators instead of going through `std::path`.

/// Final component of the path
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Final component without its extension
pub(crate) fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Extension of the final component, including the dot; empty if none
pub(crate) fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => &name[name.len() - ext.len() - 1..],
        _ => "",
    }
}

/// Replace the extension of the final component (append when there is none)
pub(crate) fn change_extension(path: &str, new_ext: &str) -> String {
    let ext_len = extension(path).len();
    format!("{}{}", &path[..path.len() - ext_len], new_ext)
}

pub(crate) fn ends_with_separator(path: &str) -> bool {
    path.ends_with('\\') || path.ends_with('/')
}
