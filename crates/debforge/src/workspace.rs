use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};

fn default_build_dir() -> String {
    "build".into()
}

fn default_out_dir() -> String {
    "out".into()
}

fn default_root_dir() -> String {
    ".".into()
}

/// What to discard before a run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanMode {
    #[default]
    None,
    Staging,
    Output,
    All,
}

impl CleanMode {
    pub fn cleans_staging(&self) -> bool {
        matches!(self, CleanMode::Staging | CleanMode::All)
    }

    pub fn cleans_output(&self) -> bool {
        matches!(self, CleanMode::Output | CleanMode::All)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root_dir: String,
    pub build_dir: String,
    pub out_dir: String,
    pub clean: CleanMode,
    pub keep_staging: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            build_dir: default_build_dir(),
            out_dir: default_out_dir(),
            clean: CleanMode::None,
            keep_staging: false,
        }
    }
}

impl WorkspaceConfig {
    pub fn load(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("workspace")?.unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub build_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl WorkspacePaths {
    /// Fixed staging root for the single build of this invocation.
    pub fn staging_root(&self) -> PathBuf {
        self.build_dir.join("staging")
    }

    pub fn error_logs_dir(&self) -> PathBuf {
        self.build_dir.join("error-logs")
    }

    /// Removes the staging root. Containment is checked against the build
    /// dir, which may live outside the workspace root.
    pub fn remove_staging(&self) -> Result<()> {
        safe_remove_dir_all(&self.build_dir, &self.staging_root())
    }

    /// Resolves a user-configured path: absolute paths are used as-is,
    /// relative ones are rooted at the workspace root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::config("empty path"));
        }
        let pb = PathBuf::from(raw);
        Ok(if pb.is_absolute() { pb } else { self.root.join(pb) })
    }
}

/// Resolves the workspace directories. The root is relative to the build
/// definition's directory; nothing is created here.
pub fn load_paths(doc: &ConfigDoc, cfg: &WorkspaceConfig) -> Result<WorkspacePaths> {
    let base = doc.base_dir();
    let base = if base.is_absolute() {
        base
    } else {
        std::env::current_dir()
            .map_err(|e| Error::msg(format!("cwd error: {e}")))?
            .join(base)
    };
    let root = resolve_user_path(&base, &cfg.root_dir)?;
    let build_dir = resolve_user_dir(&root, &cfg.build_dir)?;
    let out_dir = resolve_user_dir(&root, &cfg.out_dir)?;
    Ok(WorkspacePaths {
        root,
        build_dir,
        out_dir,
    })
}

/// Applies the clean mode. Staging is only touched when asked to.
pub fn apply_clean(paths: &WorkspacePaths, mode: CleanMode) -> Result<()> {
    if mode.cleans_staging() {
        paths.remove_staging()?;
    }
    if mode.cleans_output() {
        safe_remove_dir_all(&paths.root, &paths.out_dir)?;
    }
    Ok(())
}

fn resolve_user_dir(root: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty workspace dir"));
    }
    if Path::new(p)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::config(format!(
            "invalid workspace dir '{p}' (contains '..')"
        )));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { root.join(pb) })
}

fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty workspace path"));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

pub fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !dir_can.starts_with(&root_can) || dir_can == root_can {
        return Err(Error::msg(format!(
            "refusing to remove '{}' (not inside workspace root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can).map_err(|e| Error::io_at("remove dir", &dir_can, e))
}
