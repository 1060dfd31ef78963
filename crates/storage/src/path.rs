//! Path validation.
//!
//! Every path handed to a backend is relative to the storage root and must
//! stay inside it.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validate and normalize a storage path.
///
/// `.` components and duplicate separators are dropped, `..` is resolved
/// lexically, and the result must be non-empty and must never climb above the
/// root. Null bytes and platform prefixes are rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use seedbed_storage::validate_path;
///
/// assert!(validate_path("3F/3f2504e0-4f89-11d3-9a0c-0305e82c3301.zip").is_ok());
/// assert!(validate_path("../invalid.json").is_err());
/// assert_eq!(validate_path("./3F//x.zip").unwrap(), Path::new("3F/x.zip"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if !normalized.pop() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if normalized.as_os_str().is_empty() {
        exn::bail!(invalid());
    }
    Ok(normalized)
}
