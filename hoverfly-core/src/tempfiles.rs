//! Scoped working directory and resource lookup
//!
//! Resources (the proxy binary, certificates, middleware scripts) are looked up
//! by relative name in an ordered list of root directories and copied into a
//! temporary directory owned by one `TempFileManager`.

use crate::{HoverflyError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Environment variable naming an extra resource directory.
pub const RESOURCE_DIR_ENV: &str = "HOVERFLY_RESOURCE_DIR";

/// Ordered directories searched for resources by relative name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRoots {
    roots: Vec<PathBuf>,
}

impl ResourceRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Default search order: `override_dir`, `$HOVERFLY_RESOURCE_DIR`,
    /// `./hoverfly`, `./resources/hoverfly`.
    pub fn standard(override_dir: Option<&Path>) -> Self {
        let mut roots = Vec::new();
        if let Some(dir) = override_dir {
            roots.push(dir.to_path_buf());
        }
        if let Some(dir) = std::env::var_os(RESOURCE_DIR_ENV) {
            roots.push(PathBuf::from(dir));
        }
        roots.push(PathBuf::from("hoverfly"));
        roots.push(PathBuf::from("resources").join("hoverfly"));
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find `name` under the roots. Absolute paths and paths that exist
    /// relative to the working directory are accepted as they are.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() {
            return if direct.is_file() {
                Ok(direct.to_path_buf())
            } else {
                Err(HoverflyError::ResourceNotFound {
                    name: name.to_string(),
                    searched: vec![direct.to_path_buf()],
                })
            };
        }

        let mut searched = Vec::with_capacity(self.roots.len() + 1);
        for root in &self.roots {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(candidate);
        }

        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        searched.push(direct.to_path_buf());

        Err(HoverflyError::ResourceNotFound {
            name: name.to_string(),
            searched,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Owner read + execute
    Executable,
    /// Owner read + write
    Data,
}

/// Owns one temporary directory for the lifetime of a supervisor.
/// Dropping the manager removes the directory.
#[derive(Debug, Default)]
pub struct TempFileManager {
    dir: Option<TempDir>,
}

impl TempFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the working directory, if one has been created.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    fn ensure_dir(&mut self) -> Result<PathBuf> {
        if self.dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("hoverfly.")
                .tempdir()
                .map_err(|e| HoverflyError::Setup(format!("Failed to create temp directory: {}", e)))?;
            debug!(path = %dir.path().display(), "Created temp directory");
            self.dir = Some(dir);
        }
        match &self.dir {
            Some(dir) => Ok(dir.path().to_path_buf()),
            None => Err(HoverflyError::Setup("Temp directory unavailable".to_string())),
        }
    }

    /// Resolve `name` under `roots` and copy it into the working directory.
    pub fn copy_resource(&mut self, name: &str, roots: &ResourceRoots, kind: ResourceKind) -> Result<PathBuf> {
        let source = roots.resolve(name)?;
        self.copy_file(&source, kind)
    }

    /// Copy `source` into the working directory, keeping its file name.
    pub fn copy_file(&mut self, source: &Path, kind: ResourceKind) -> Result<PathBuf> {
        let dir = self.ensure_dir()?;
        let file_name = source
            .file_name()
            .ok_or_else(|| HoverflyError::Setup(format!("Not a file: {}", source.display())))?;

        let mut target = dir.join(file_name);
        let mut n = 1;
        while target.exists() {
            target = dir.join(format!("{}-{}", n, file_name.to_string_lossy()));
            n += 1;
        }

        fs::copy(source, &target).map_err(|e| {
            HoverflyError::Setup(format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
        set_permissions(&target, kind)?;
        debug!(source = %source.display(), target = %target.display(), "Copied resource");
        Ok(target)
    }

    /// Remove the working directory. Safe to call more than once.
    pub fn purge(&mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()
                .map_err(|e| HoverflyError::Setup(format!("Failed to delete {}: {}", path.display(), e)))?;
            debug!(path = %path.display(), "Deleted temp directory");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, kind: ResourceKind) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match kind {
        ResourceKind::Executable => 0o500,
        ResourceKind::Data => 0o600,
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        HoverflyError::Setup(format!("Failed to set permissions on {}: {}", path.display(), e))
    })
}

// Without POSIX modes the copy keeps owner read/write/execute.
#[cfg(not(unix))]
fn set_permissions(path: &Path, _kind: ResourceKind) -> Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_searches_roots_in_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(second.path().join("cert.pem"), "second").unwrap();

        let roots = ResourceRoots::new(vec![first.path().into(), second.path().into()]);
        assert_eq!(roots.resolve("cert.pem").unwrap(), second.path().join("cert.pem"));

        fs::write(first.path().join("cert.pem"), "first").unwrap();
        assert_eq!(roots.resolve("cert.pem").unwrap(), first.path().join("cert.pem"));
    }

    #[test]
    fn test_resolve_missing_lists_candidates() {
        let root = tempdir().unwrap();
        let roots = ResourceRoots::new(vec![root.path().into()]);
        match roots.resolve("missing.pem") {
            Err(HoverflyError::ResourceNotFound { searched, .. }) => {
                assert_eq!(searched[0], root.path().join("missing.pem"));
            }
            other => panic!("expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_and_purge() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("hoverfly_bin"), "#!/bin/sh\n").unwrap();
        let roots = ResourceRoots::new(vec![root.path().into()]);

        let mut manager = TempFileManager::new();
        assert!(manager.path().is_none());
        let copied = manager
            .copy_resource("hoverfly_bin", &roots, ResourceKind::Executable)
            .unwrap();
        let dir = manager.path().unwrap().to_path_buf();
        assert!(copied.starts_with(&dir));
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("hoverfly."));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&copied).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o500);
        }

        manager.purge().unwrap();
        assert!(!dir.exists());
        manager.purge().unwrap();
    }

    #[test]
    fn test_name_collisions_get_distinct_targets() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(a.path().join("cert.pem"), "a").unwrap();
        fs::write(b.path().join("cert.pem"), "b").unwrap();

        let mut manager = TempFileManager::new();
        let first = manager.copy_file(&a.path().join("cert.pem"), ResourceKind::Data).unwrap();
        let second = manager.copy_file(&b.path().join("cert.pem"), ResourceKind::Data).unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(second).unwrap(), "b");
    }
}
