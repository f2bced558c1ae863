//! Atomic file writes: write-to-temp-then-rename.
//!
//! Every durable write in Sigil goes through [`write_atomic`]. The target
//! file is either entirely its pre-write contents or entirely its
//! post-write contents; a crash can never leave a half-written document.

use std::fs;
use std::io::Write;
use std::path::Path;

/// Write `bytes` to `path` atomically with the given Unix permissions.
///
/// Writes to `path + ".tmp"`, fsyncs, then renames over `path`. The temp
/// file is removed on any error before the rename. Parent directories
/// must already exist.
///
/// On non-Unix platforms `mode` is ignored.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let tmp_path = tmp_path_for(path);

    let result = write_tmp(&tmp_path, bytes, mode).and_then(|()| fs::rename(&tmp_path, path));

    if result.is_err() {
        // Leave no temp file behind. The original target is untouched.
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %tmp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }

    result
}

/// The temp-file path for a target: the target path with `.tmp` appended.
fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}

fn write_tmp(tmp_path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    let mut file = options.open(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"{\"v\":1}", 0o600).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{\"v\":1}");
    }

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"old", 0o600).unwrap();
        write_atomic(&path, b"new", 0o600).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn no_tmp_file_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"data", 0o600).unwrap();
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn error_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"original", 0o600).unwrap();

        // A write into a missing subdirectory must fail before the rename.
        let bad = dir.path().join("missing").join("doc.json");
        assert!(write_atomic(&bad, b"x", 0o600).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[cfg(unix)]
    #[test]
    fn applies_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");

        write_atomic(&path, b"s", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let p = Path::new("/a/b/utxos.json");
        assert_eq!(tmp_path_for(p), Path::new("/a/b/utxos.json.tmp"));
    }

    #[test]
    fn recovers_from_crash_between_write_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(&path, b"committed", 0o600).unwrap();

        // A crash after the temp write but before the rename leaves a
        // stray temp file; the target still holds the committed bytes.
        fs::write(tmp_path_for(&path), b"half-written").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"committed");

        // The next write replaces the stray temp and commits cleanly.
        write_atomic(&path, b"next", 0o600).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"next");
        assert!(!tmp_path_for(&path).exists());
    }
}
