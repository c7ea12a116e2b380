//! Managed files under a configurable root

use anyhow::{Context, Result, bail};
use declarative::{Backend, ResourceDeclaration, ResourceKind, ResourceValue};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Files named by absolute path, written below `root`
#[derive(Debug, Clone)]
pub struct Files {
    root: PathBuf,
}

impl Files {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of `name` below the root; `..` components are refused
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("{name} escapes {}", self.root.display());
        }
        Ok(self.root.join(relative))
    }
}

#[cfg(unix)]
fn read_mode(path: &Path) -> Result<String> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(format!("{:04o}", mode & 0o7777))
}

#[cfg(not(unix))]
fn read_mode(_path: &Path) -> Result<String> {
    Ok("0644".to_string())
}

#[cfg(unix)]
fn write_mode(path: &Path, mode: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let bits = u32::from_str_radix(mode, 8).with_context(|| format!("Invalid file mode '{mode}'"))?;
    fs::set_permissions(path, fs::Permissions::from_mode(bits))
        .with_context(|| format!("Failed to set mode of {}", path.display()))
}

#[cfg(not(unix))]
fn write_mode(_path: &Path, _mode: &str) -> Result<()> {
    Ok(())
}

impl Backend for Files {
    fn kind(&self) -> ResourceKind {
        ResourceKind::FileContent
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(ResourceValue::FileContent {
            content,
            mode: read_mode(&path)?,
        }))
    }

    /// Files are never enumerated; only declared paths are probed
    fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        let ResourceValue::FileContent { content, mode } = &declaration.value else {
            bail!("{} is not a file", declaration.id);
        };
        let path = self.resolve(&declaration.id.name)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        write_mode(&path, mode)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }
}
