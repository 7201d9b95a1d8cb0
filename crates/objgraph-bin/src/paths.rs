//! File system paths for the daemon.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Socket filename under the base runtime directory.
const SOCKET_NAME: &str = "objgraphd.sock";
/// Config filename under the base runtime directory.
const CONFIG_NAME: &str = "config.json";

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for daemon runtime files (~/.objgraph)
    base_dir: PathBuf,
}

impl Paths {
    /// Use `~/.objgraph` for runtime files.
    pub fn new() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(Self {
            base_dir: home.join(".objgraph"),
        })
    }

    /// Use a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the Unix listening socket.
    pub fn socket_path(&self) -> PathBuf {
        self.base_dir.join(SOCKET_NAME)
    }

    /// Path of the JSON config file.
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join(CONFIG_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_base_dir_drives_every_path() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/og-test"));
        assert_eq!(paths.base_dir(), Path::new("/tmp/og-test"));
        assert_eq!(
            paths.socket_path(),
            PathBuf::from("/tmp/og-test/objgraphd.sock")
        );
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/og-test/config.json")
        );
    }
}
