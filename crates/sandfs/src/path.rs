//! Path validation, normalization and containment.
//!
//! Two levels of strictness:
//!
//! - [`normalize_path`] accepts `..` and resolves it lexically. Use it for
//!   trusted paths such as a configured base directory.
//! - [`validate_path`] rejects `..` and absolute paths outright. Use it on
//!   caller-supplied names before they are joined onto a backend root.

use std::ffi::OsStr;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use crate::error::FsError;
use crate::types::DEFAULT_DIR_PERM;

/// Maximum attempts when picking a random temp name.
pub(crate) const TEMP_NAME_ATTEMPTS: u32 = 10_000;

fn is_control(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

/// True if any byte of the path is an ASCII control character.
pub fn has_control_chars(path: &Path) -> bool {
    path.as_os_str().as_encoded_bytes().iter().any(|&b| is_control(b))
}

/// Lexically clean a path: drop `.`, fold `name/..`, collapse separators.
///
/// `..` at the root of an absolute path is dropped; leading `..` of a
/// relative path is kept. An empty result becomes `"."`.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut parts: Vec<&OsStr> = Vec::new();
    let mut rooted = false;

    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => {
                out.push(component.as_os_str());
                rooted = true;
            }
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if *last != OsStr::new("..") => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(OsStr::new("..")),
            },
            Component::Normal(s) => parts.push(s),
        }
    }

    for part in parts {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Clean `path` and make it absolute against the process working directory.
pub fn normalize_path(path: &Path) -> Result<PathBuf, FsError> {
    if path.as_os_str().is_empty() {
        return Err(FsError::InvalidPath("empty path".to_string()));
    }
    if has_control_chars(path) {
        return Err(FsError::invalid_path(path));
    }

    let cleaned = clean(path);
    if cleaned.is_absolute() {
        return Ok(cleaned);
    }
    let cwd = std::env::current_dir()?;
    Ok(clean(&cwd.join(cleaned)))
}

/// Validate an untrusted relative path.
///
/// Rejects empty paths, control characters and absolute paths with
/// [`FsError::InvalidPath`], and any `..` segment with
/// [`FsError::PathTraversal`].
pub fn validate_path(path: &Path) -> Result<(), FsError> {
    if path.as_os_str().is_empty() {
        return Err(FsError::InvalidPath("empty path".to_string()));
    }
    if has_control_chars(path) {
        return Err(FsError::invalid_path(path));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => return Err(FsError::path_traversal(path)),
            Component::RootDir | Component::Prefix(_) => {
                return Err(FsError::invalid_path(path));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Join components onto `base`, validating each one first.
///
/// A single malicious component (`..`, `/etc`) fails the whole join.
pub fn join_path<I, P>(base: &Path, components: I) -> Result<PathBuf, FsError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut joined = base.to_path_buf();
    for component in components {
        let component = component.as_ref();
        validate_path(component)?;
        joined.push(component);
    }
    Ok(clean(&joined))
}

/// True if `child` is `parent` or lies beneath it, after normalizing both.
pub fn is_sub_path(parent: &Path, child: &Path) -> Result<bool, FsError> {
    let parent = normalize_path(parent)?;
    let child = normalize_path(child)?;
    Ok(child.strip_prefix(&parent).is_ok())
}

/// Create `path` (and parents) if absent. Fails if it exists as a non-directory.
pub fn ensure_dir(path: &Path) -> Result<(), FsError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(FsError::not_a_directory(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(DEFAULT_DIR_PERM)
                .create(path)?;
            Ok(())
        }
        Err(e) => Err(FsError::Io(e)),
    }
}

/// Last element of `path`, POSIX style.
///
/// Trailing separators are ignored; `""` yields `"."` and a path of only
/// separators yields `"/"`.
pub fn get_base_name(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Extension of the final element, without the dot.
///
/// The rightmost dot wins (`a.tar.gz` → `gz`). Hidden files with no other
/// dot (`.bashrc`) and names ending in a dot (`file.`) have no extension.
pub fn get_file_extension(path: &str) -> &str {
    let name = get_base_name(path);
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) if idx == name.len() - 1 => "",
        Some(idx) => &name[idx + 1..],
    }
}

/// Expand a temp-name pattern: the last `*` is replaced by a random
/// number, otherwise the number is appended.
pub(crate) fn temp_name(pattern: &str) -> Result<String, FsError> {
    if pattern.contains('/') || pattern.contains(std::path::MAIN_SEPARATOR) {
        return Err(FsError::InvalidPath(format!(
            "pattern contains path separator: {pattern}"
        )));
    }
    if has_control_chars(Path::new(pattern)) {
        return Err(FsError::invalid_path(pattern));
    }
    let random = rand::random::<u32>();
    Ok(match pattern.rfind('*') {
        Some(idx) => format!("{}{}{}", &pattern[..idx], random, &pattern[idx + 1..]),
        None => format!("{pattern}{random}"),
    })
}
