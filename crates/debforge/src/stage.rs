//! Source staging: copy the application tree (with its `debian/` descriptor)
//! into the fixed staging root.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util;
use crate::workspace::WorkspacePaths;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: String,
    pub descriptor_dir: String,
    /// Top-level entries of the source tree that are never staged.
    pub exclude: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: ".".into(),
            descriptor_dir: "debian".into(),
            exclude: vec![".git".into()],
        }
    }
}

impl SourceConfig {
    pub fn load(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("source")?.unwrap_or_default())
    }
}

/// Fixed locations under the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    pub root: PathBuf,
    /// The staged [`SourceTree`].
    pub source: PathBuf,
    /// Install destination, laid out like the installed system.
    pub package_root: PathBuf,
    /// Scratch directory exposed to build commands as `{build_output}`.
    pub build_output: PathBuf,
    /// Where the package phase writes the archive.
    pub archives: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            source: root.join("source"),
            package_root: root.join("package-root"),
            build_output: root.join("build-output"),
            archives: root.join("archives"),
            root,
        }
    }
}

/// The staged application source. Phases read it; only build tools invoked
/// inside it write derived products next to the sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    pub root: PathBuf,
    pub descriptor_dir: PathBuf,
}

/// Copies the source into `<build_dir>/staging/source`.
///
/// The staging root must be absent or empty; a leftover root is only
/// discarded when `clean_rerun` is set, otherwise this is a staging conflict.
pub fn stage_source(
    cfg: &SourceConfig,
    paths: &WorkspacePaths,
    clean_rerun: bool,
    ctx: &ExecCtx,
) -> Result<(StagingLayout, SourceTree)> {
    util::validate_rel_path(&cfg.descriptor_dir)?;
    let src = paths.resolve(&cfg.path)?;
    if !src.is_dir() {
        return Err(Error::config(format!(
            "source path {} is not a directory",
            src.display()
        )));
    }

    let layout = StagingLayout::new(paths.staging_root());
    if layout.root.exists() && !util::dir_is_empty(&layout.root)? {
        if !clean_rerun {
            return Err(Error::StagingConflict {
                root: layout.root.clone(),
            });
        }
        ctx.log(&format!("discarding previous staging root {}", layout.root.display()));
        paths.remove_staging()?;
    }

    let skip = workspace_dirs_inside(&src, paths);
    info!(from = %src.display(), to = %layout.source.display(), ?skip, "staging source");
    ctx.log(&format!("staging {} -> {}", src.display(), layout.source.display()));
    util::copy_tree(&src, &layout.source, &cfg.exclude, &skip)?;

    let tree = SourceTree {
        descriptor_dir: layout.source.join(cfg.descriptor_dir.trim()),
        root: layout.source.clone(),
    };
    Ok((layout, tree))
}

/// Build, output and staging dirs that live somewhere inside `src`, relative
/// to it. They are never part of the staged source.
fn workspace_dirs_inside(src: &Path, paths: &WorkspacePaths) -> Vec<PathBuf> {
    let src = util::canonical_lossy(src);
    [&paths.build_dir, &paths.out_dir, &paths.staging_root()]
        .into_iter()
        .filter_map(|dir| {
            let dir = util::canonical_lossy(dir);
            let rel = dir.strip_prefix(&src).ok()?;
            (!rel.as_os_str().is_empty()).then(|| rel.to_path_buf())
        })
        .collect()
}

/// Drops the staging root once the artifact has been harvested.
pub fn discard(paths: &WorkspacePaths) -> Result<()> {
    paths.remove_staging()
}
