//! Mirror into a local or mounted directory

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{ReplicationTarget, checked_relative};

pub struct DirectoryTarget {
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(remote_path)?))
    }
}

impl ReplicationTarget for DirectoryTarget {
    fn ensure_directory(&self, remote_path: &str) -> Result<()> {
        let dir = self.resolve(remote_path)?;
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))
    }

    fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let dest = self.resolve(remote_path)?;
        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        fs::copy(local_path, &tmp).with_context(|| {
            format!("Failed to copy {} to {}", local_path.display(), tmp.display())
        })?;
        fs::rename(&tmp, &dest)
            .with_context(|| format!("Failed to move {} into place", dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_target_rejects_escape() {
        let remote = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(remote.path());
        assert!(target.ensure_directory("../outside").is_err());
        assert!(target.ensure_directory("/abs").is_err());
        assert!(target.ensure_directory("2025_06_30/attach").is_ok());
        assert!(remote.path().join("2025_06_30/attach").is_dir());
    }

    #[test]
    fn test_put_file_leaves_no_partial_file() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let src = local.path().join("nav.pdf");
        fs::write(&src, b"pdf").unwrap();

        let target = DirectoryTarget::new(remote.path());
        target.put_file(&src, "nav.pdf").unwrap();

        assert_eq!(fs::read(remote.path().join("nav.pdf")).unwrap(), b"pdf");
        assert!(!remote.path().join("nav.pdf.part").exists());
    }
}
