//! Tree path parsing.
//!
//! Paths are absolute and slash-delimited: `/world/attributes/masterClock`.
//! Repeated slashes collapse, `/` is the root, and `.`/`..` segments are
//! rejected so that a path always names one node.

use super::TreeError;

/// Split an absolute path into its segments. The root yields no segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, TreeError> {
    if !path.starts_with('/') {
        return Err(TreeError::InvalidPath(path.to_string()));
    }

    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    if parts.iter().any(|part| *part == "." || *part == "..") {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Join segments back into a normalized absolute path.
pub fn join_path(parts: &[&str]) -> String {
    if parts.is_empty() {
        return "/".to_string();
    }
    parts.iter().fold(String::new(), |mut path, part| {
        path.push('/');
        path.push_str(part);
        path
    })
}

/// Path of a child node under `parent`.
pub fn child_path(parent: &str, child: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}

/// A node name must be a single non-empty segment.
pub fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}
