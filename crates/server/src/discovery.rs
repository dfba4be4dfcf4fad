//! Plugin discovery file.
//!
//! The runtime finds the driver by reading `<plugin_dir>/<name>.spec`, a
//! plain-text file holding the listener address.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Extension the runtime looks for in the plugin directory.
pub const SPEC_EXTENSION: &str = "spec";

pub fn spec_file_path(plugin_dir: &Path, name: &str) -> PathBuf {
    plugin_dir.join(format!("{name}.{SPEC_EXTENSION}"))
}

/// Address URI of a Unix socket listener.
pub fn socket_uri(socket_path: &Path) -> String {
    format!("unix://{}", socket_path.display())
}

/// Writes the discovery file, creating `plugin_dir` if needed.
pub async fn write_spec_file(
    plugin_dir: &Path,
    name: &str,
    socket_path: &Path,
) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(plugin_dir).await?;
    let path = spec_file_path(plugin_dir, name);
    tokio::fs::write(&path, socket_uri(socket_path)).await?;
    debug!(path = %path.display(), "discovery file written");
    Ok(path)
}

/// Removes the discovery file. A missing file is not an error.
pub async fn remove_spec_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "discovery file removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_file_is_named_after_the_driver() {
        assert_eq!(
            spec_file_path(Path::new("/etc/docker/plugins"), "Contrail"),
            PathBuf::from("/etc/docker/plugins/Contrail.spec")
        );
        assert_eq!(
            socket_uri(Path::new("/run/docker/plugins/contrail.sock")),
            "unix:///run/docker/plugins/contrail.sock"
        );
    }

    #[tokio::test]
    async fn write_then_remove() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let plugin_dir = dir.path().join("plugins");

        let path = write_spec_file(&plugin_dir, "Contrail", Path::new("/tmp/c.sock"))
            .await
            .expect("should write spec file");
        let content = tokio::fs::read_to_string(&path)
            .await
            .expect("should read spec file");
        assert_eq!(content, "unix:///tmp/c.sock");

        remove_spec_file(&path).await.expect("should remove");
        assert!(!path.exists());
        remove_spec_file(&path)
            .await
            .expect("removing a missing file is fine");
    }
}
