//! Path sandbox for file indexing.
//!
//! Accepts only paths that resolve under a configured working directory, with an extension in a
//! caller-supplied whitelist, and rejects symlinks that would escape the sandbox.

use std::path::{Path, PathBuf};

use crate::error::TheresError;

/// Validate `candidate` against `root`, returning the canonicalised path on success.
///
/// `allowed_extensions` is matched case-insensitively against the final path component's
/// extension (without the leading dot), e.g. `&["md", "txt", "pdf"]`.
pub fn validate(
    root: &Path,
    candidate: &Path,
    allowed_extensions: &[&str],
) -> Result<PathBuf, TheresError> {
    let root = root
        .canonicalize()
        .map_err(|e| TheresError::Validation(format!("sandbox root does not exist: {e}")))?;

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let resolved = joined.canonicalize().map_err(|e| {
        TheresError::Validation(format!("path does not resolve: {e}"))
    })?;

    if !resolved.starts_with(&root) {
        return Err(TheresError::Validation(
            "path escapes the sandboxed directory".to_string(),
        ));
    }

    let extension = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let allowed = extension
        .as_deref()
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);

    if !allowed {
        return Err(TheresError::Validation(format!(
            "file extension {:?} is not in the allowed list",
            extension
        )));
    }

    // `canonicalize()` above already resolves symlinks to their real target; requiring the
    // resolved real path to stay under `root` rejects any symlink whose target escapes the
    // sandbox even if the link itself lives inside it.
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn accepts_file_inside_sandbox_with_allowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        fs::write(&file, "hello").unwrap();

        let result = validate(dir.path(), Path::new("notes.md"), &["md", "txt"]);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, "echo hi").unwrap();

        let result = validate(dir.path(), Path::new("script.sh"), &["md", "txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_path_traversal_outside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();
        let outside = dir.path().join("outside.md");
        fs::write(&outside, "secret").unwrap();

        let result = validate(
            &dir.path().join("inner"),
            Path::new("../outside.md"),
            &["md"],
        );
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().join("sandbox");
        fs::create_dir(&sandbox).unwrap();
        let outside = dir.path().join("secret.md");
        fs::write(&outside, "top secret").unwrap();

        let link = sandbox.join("link.md");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let result = validate(&sandbox, Path::new("link.md"), &["md"]);
        assert!(result.is_err());
    }
}
