//! Unix socket file management
//!
//! Both the broadcast sink and the SSH agent proxy own a socket file. A file
//! left behind by a crashed instance is removed before binding, but only if
//! it really is a socket and nothing is listening on it.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use tokio::net::UnixListener;

/// Bind a listener at `path`, replacing a stale socket file.
///
/// Fails with `AddrInUse` if another process is accepting on `path`.
pub fn bind_unix_socket(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ));
            }
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("another process is listening on {}", path.display()),
                ));
            }
            tracing::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// Remove a socket file; `Ok` if it is already gone
pub fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_creates_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("td.socket");

        let _listener = bind_unix_socket(&path).unwrap();
        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(metadata.file_type().is_socket());
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");

        // A std listener that is dropped leaves its file behind
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let _listener = bind_unix_socket(&path).unwrap();
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");

        let _first = bind_unix_socket(&path).unwrap();
        let err = bind_unix_socket(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");
        std::fs::write(&path, b"not a socket").unwrap();

        let err = bind_unix_socket(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(path.exists());
    }

    #[test]
    fn test_remove_missing_socket_file() {
        let dir = TempDir::new().unwrap();
        remove_socket_file(&dir.path().join("absent.socket")).unwrap();
    }
}
