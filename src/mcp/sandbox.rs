//! Command/argument sandbox applied before spawning any MCP child process.
//!
//! A hard allow-list (rather than a deny-list alone) because new shells and downloaders appear
//! faster than this list could be kept current; the blocked set exists only to give a clearer
//! rejection message for the most common mistakes, since they'd fail the allow-list check anyway.

use std::path::Path;

use crate::error::TheresError;

const BLOCKED: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "fdisk", "sh", "bash", "zsh", "curl", "wget", "nc", "ncat",
    "telnet", "ssh", "scp", "chmod", "chown", "sudo", "su", "kill", "killall",
];

const ALLOWED: &[&str] = &["npx", "node", "python", "python3", "uvx", "uv", "docker", "deno", "bun"];

const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '>', '<'];

/// Validate `command` and its `args` before spawning. Returns the resolved, absolute path to the
/// executable on success.
pub fn validate(command: &str, args: &[&str]) -> Result<std::path::PathBuf, TheresError> {
    let resolved = which::which(command).unwrap_or_else(|_| std::path::PathBuf::from(command));
    let base = resolved
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command)
        .to_string();
    // On Windows the resolved executable may carry a `.exe`/`.cmd` suffix; compare case-
    // insensitively against the bare name so `node.exe` still matches `node`.
    let base_stem = Path::new(&base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&base)
        .to_ascii_lowercase();

    if BLOCKED.contains(&base_stem.as_str()) {
        return Err(TheresError::Validation(format!(
            "la commande \"{base}\" est bloquée pour des raisons de sécurité"
        )));
    }
    if !ALLOWED.contains(&base_stem.as_str()) {
        return Err(TheresError::Validation(format!(
            "la commande \"{base}\" n'est pas autorisée"
        )));
    }
    for arg in args {
        if arg.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
            return Err(TheresError::Validation(format!(
                "l'argument \"{arg}\" contient un opérateur shell interdit"
            )));
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blocked_command() {
        let err = validate("rm", &[]).unwrap_err();
        assert!(err.user_safe_message().to_lowercase().contains("bloqué") || format!("{err}").to_lowercase().contains("bloqué"));
    }

    #[test]
    fn rejects_command_not_in_allow_list() {
        let err = validate("cat", &[]).unwrap_err();
        assert!(format!("{err}").contains("n'est pas autorisée") || format!("{err}").contains("non autorisée"));
    }

    #[test]
    fn rejects_shell_metacharacters_in_args() {
        let err = validate("npx", &["@x/y", "; rm -rf /"]).unwrap_err();
        assert!(format!("{err}").contains("opérateur"));
    }

    #[test]
    fn accepts_allowed_command_with_absolute_path() {
        // `which` may not resolve a path that doesn't exist on this machine; what's under test
        // is that an allow-listed basename is accepted regardless of the directory it lives in.
        let result = validate("/usr/local/bin/node", &[]);
        assert!(result.is_ok());
    }

    #[test]
    fn accepts_plain_allowed_commands() {
        for cmd in ALLOWED {
            assert!(validate(cmd, &["--version"]).is_ok());
        }
    }
}
