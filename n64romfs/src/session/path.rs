//! Remote path handling.
//!
//! Device paths are absolute, `/`-separated and carry no trailing slash
//! except for the root itself.

use crate::error::{Error, Result};
use crate::protocol::{MAX_NAME_LEN, MAX_PATH_LEN};

/// Check that `name` can be stored as a single entry name.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidPath(format!("{name:?}: {why}")));
    if name.is_empty() {
        return invalid("empty name");
    }
    if name == "." || name == ".." {
        return invalid("reserved name");
    }
    if name.contains(['/', '\0']) {
        return invalid("contains '/' or NUL");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid(&format!("longer than {MAX_NAME_LEN} bytes"));
    }
    Ok(())
}

/// Resolve `path` against the directory `base`.
///
/// An empty path is the root. `.` and `..` components are folded, repeated
/// and trailing slashes are dropped.
pub fn normalize(base: &str, path: &str) -> Result<String> {
    let joined = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("{base}/{path}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            name => {
                validate_name(name)?;
                parts.push(name);
            },
        }
    }

    let normalized = format!("/{}", parts.join("/"));
    if normalized.len() > MAX_PATH_LEN {
        return Err(Error::InvalidPath(format!(
            "path longer than {MAX_PATH_LEN} bytes"
        )));
    }
    Ok(normalized)
}

/// Join a normalized directory and an entry name.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent directory of a normalized path (`/` for the root).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Last component of a normalized path (empty for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}
