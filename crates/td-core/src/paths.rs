//! Default path derivation and environment expansion
//!
//! Every default mirrors where the observed software puts its files:
//! pam-u2f writes its lock file into the per-user runtime directory and
//! gpg keeps its keybox under `$GNUPGHOME` (or `~/.gnupg`).

use std::env;
use std::path::{Path, PathBuf};

/// File name pam-u2f creates while waiting for a touch
pub const U2F_LOCK_FILE_NAME: &str = "pam-u2f-touch";

/// Keybox file name inside the GnuPG home
pub const PUBRING_FILE_NAME: &str = "pubring.kbx";

/// Broadcast socket file name inside the runtime directory
pub const SOCKET_FILE_NAME: &str = "touch-detector.socket";

/// SSH agent proxy socket file name inside the runtime directory
pub const SSH_PROXY_FILE_NAME: &str = "touch-detector.ssh.socket";

/// Per-user runtime directory
///
/// `$XDG_RUNTIME_DIR` when set, otherwise `/run/user/<uid>` on Unix.
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    fallback_runtime_dir()
}

#[cfg(unix)]
fn fallback_runtime_dir() -> PathBuf {
    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/run/user/{uid}"))
}

#[cfg(not(unix))]
fn fallback_runtime_dir() -> PathBuf {
    env::temp_dir()
}

/// GnuPG home directory (`$GNUPGHOME`, else `~/.gnupg`)
pub fn gnupg_home() -> PathBuf {
    if let Some(home) = env::var_os("GNUPGHOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir().unwrap_or_default().join(".gnupg")
}

/// Default pam-u2f lock file path
pub fn default_u2f_lock_path() -> PathBuf {
    runtime_dir().join(U2F_LOCK_FILE_NAME)
}

/// Default keybox path
pub fn default_pubring_path() -> PathBuf {
    gnupg_home().join(PUBRING_FILE_NAME)
}

/// Default broadcast socket path
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join(SOCKET_FILE_NAME)
}

/// Default SSH agent proxy socket path
pub fn default_ssh_proxy_path() -> PathBuf {
    runtime_dir().join(SSH_PROXY_FILE_NAME)
}

/// Upstream SSH agent socket from `$SSH_AUTH_SOCK`
pub fn default_ssh_upstream() -> Option<PathBuf> {
    env::var_os("SSH_AUTH_SOCK")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Expand `$VAR` and `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| env::var(name).ok())
}

/// Expand environment references in a path
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) if s.contains('$') => PathBuf::from(expand_env(s)),
        _ => path.to_path_buf(),
    }
}

/// Expand `$VAR` and `${VAR}` using `lookup` for values
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&lookup(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated brace, keep verbatim
                    out.push_str(&rest[pos..]);
                    rest = "";
                }
            }
            continue;
        }

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if name_len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..name_len]).unwrap_or_default());
        }
        rest = &after[name_len..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/alice".to_string()),
            "UID" => Some("1000".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_plain_and_braced() {
        assert_eq!(
            expand_with("$HOME/.gnupg/pubring.kbx", lookup),
            "/home/alice/.gnupg/pubring.kbx"
        );
        assert_eq!(
            expand_with("/run/user/${UID}/pam-u2f-touch", lookup),
            "/run/user/1000/pam-u2f-touch"
        );
    }

    #[test]
    fn test_expand_unset_is_empty() {
        assert_eq!(expand_with("$NOPE/x", lookup), "/x");
        assert_eq!(expand_with("${NOPE}", lookup), "");
    }

    #[test]
    fn test_expand_edge_cases() {
        assert_eq!(expand_with("no vars", lookup), "no vars");
        assert_eq!(expand_with("cost $5", lookup), "cost ");
        assert_eq!(expand_with("trailing $", lookup), "trailing $");
        assert_eq!(expand_with("${HOME", lookup), "${HOME");
        assert_eq!(expand_with("$HOME$UID", lookup), "/home/alice1000");
    }

    #[test]
    fn test_expand_path_without_vars_is_unchanged() {
        let path = Path::new("/tmp/plain");
        assert_eq!(expand_path(path), PathBuf::from("/tmp/plain"));
    }

    #[test]
    fn test_default_file_names() {
        assert!(default_u2f_lock_path().ends_with(U2F_LOCK_FILE_NAME));
        assert!(default_pubring_path().ends_with(PUBRING_FILE_NAME));
        assert!(default_socket_path().ends_with(SOCKET_FILE_NAME));
        assert!(default_ssh_proxy_path().ends_with(SSH_PROXY_FILE_NAME));
    }
}
