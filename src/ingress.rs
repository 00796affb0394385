//! Safe placement of client-supplied bytes into a workspace.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Replaces every character outside `[A-Za-z0-9._-]` with an underscore.
///
/// Filenames later end up as argv entries for external tools and as path
/// segments inside the workspace, so traversal sequences and shell
/// metacharacters must not survive.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Case-insensitive extension check against an allowlist like `["pdf"]`.
pub fn has_allowed_extension(name: &str, allowed: &[&str]) -> bool {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => return false,
    };
    allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext))
}

/// Writes one uploaded file into `dir` under its sanitized name.
///
/// The size ceiling is enforced before any byte touches disk, and an
/// existing path is never overwritten: collisions get a numeric prefix.
pub fn store(
    dir: &Path,
    original_name: &str,
    bytes: &[u8],
    max_bytes: u64,
    allowed_extensions: &[&str],
) -> Result<PathBuf> {
    if bytes.len() as u64 > max_bytes {
        return Err(Error::PayloadTooLarge {
            limit_mb: max_bytes / (1024 * 1024),
        });
    }
    if !has_allowed_extension(original_name, allowed_extensions) {
        return Err(Error::UnsupportedType {
            name: sanitize_name(original_name),
        });
    }

    let name = sanitize_name(original_name);
    let mut path = dir.join(&name);
    let mut index = 1u32;
    while path.exists() {
        path = dir.join(format!("{index}-{name}"));
        index += 1;
    }
    fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal_and_metacharacters() {
        assert_eq!(sanitize_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_name("a;rm -rf $(x).pdf"), "a_rm_-rf___x_.pdf");
        assert_eq!(sanitize_name("report\0.pdf"), "report_.pdf");
        assert_eq!(sanitize_name("ok-file_1.PDF"), "ok-file_1.PDF");
        assert_eq!(sanitize_name(""), "file");
    }

    #[test]
    fn sanitized_names_stay_inside_the_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let path = store(
            tmp.path(),
            "../../escape.pdf",
            b"%PDF-1.4",
            1024,
            &["pdf"],
        )
        .unwrap();
        assert!(path.starts_with(tmp.path()));
        assert_eq!(path.parent().unwrap(), tmp.path());
    }

    #[test]
    fn oversize_payload_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store(tmp.path(), "big.pdf", &[0u8; 2048], 1024, &["pdf"]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store(tmp.path(), "tool.exe", b"MZ", 1024, &["pdf"]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_allowed_extension("scan.PDF", &["pdf"]));
        assert!(has_allowed_extension("photo.JPeG", &["jpg", "jpeg", "png"]));
        assert!(!has_allowed_extension("noext", &["pdf"]));
        assert!(!has_allowed_extension("trailing.", &["pdf"]));
    }

    #[test]
    fn colliding_names_never_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let first = store(tmp.path(), "doc.pdf", b"one", 1024, &["pdf"]).unwrap();
        let second = store(tmp.path(), "doc.pdf", b"two", 1024, &["pdf"]).unwrap();
        let third = store(tmp.path(), "doc.pdf", b"three", 1024, &["pdf"]).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&second).unwrap(), b"two");
        assert_eq!(fs::read(&third).unwrap(), b"three");
    }
}
