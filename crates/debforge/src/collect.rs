//! Artifact collection: find the archive the package phase produced and
//! publish it, with a manifest, into the output directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::descriptor::PackageSpec;
use crate::error::{Error, Result};
use crate::stage::StagingLayout;
use crate::util;

/// A published package archive. Owned by the invoker once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub file_name: String,
    pub sha256: String,
}

impl Artifact {
    pub fn manifest_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }
}

/// Where the package phase must have left the archive for `spec`.
pub fn expected_archive(layout: &StagingLayout, spec: &PackageSpec) -> PathBuf {
    layout.archives.join(spec.archive_file_name())
}

/// Copies the archive into `out_dir` and writes its manifest next to it.
///
/// Both files are written to a temp file in `out_dir` first and persisted
/// by rename, so a reader never sees a partial archive.
pub fn collect(layout: &StagingLayout, spec: &PackageSpec, out_dir: &Path) -> Result<Artifact> {
    let expected = expected_archive(layout, spec);
    if !expected.is_file() {
        return Err(Error::ArtifactNotFound { expected });
    }

    util::ensure_dir(out_dir)?;
    let file_name = spec.archive_file_name();
    let dest = out_dir.join(&file_name);
    persist_copy(&expected, &dest)?;

    let artifact = Artifact {
        sha256: util::sha256_file_hex(&dest)?,
        path: dest,
        name: spec.name.clone(),
        version: spec.version.to_string(),
        architecture: spec.architecture.clone(),
        file_name,
    };
    let manifest = serde_json::to_string_pretty(&artifact)
        .map_err(|e| Error::msg(format!("serialize manifest: {e}")))?;
    if let Err(e) = persist_bytes(manifest.as_bytes(), &artifact.manifest_path()) {
        if let Err(cleanup) = util::remove_path(&artifact.path) {
            warn!(error = %cleanup, archive = %artifact.path.display(), "failed to remove archive after manifest error");
        }
        return Err(e);
    }

    info!(
        archive = %artifact.path.display(),
        sha256 = %artifact.sha256,
        "artifact collected"
    );
    Ok(artifact)
}

fn persist_copy(src: &Path, dest: &Path) -> Result<()> {
    let mut input = File::open(src).map_err(|e| Error::io_at("open", src, e))?;
    persist_with(dest, |tmp| io::copy(&mut input, tmp).map(|_| ()))
}

fn persist_bytes(body: &[u8], dest: &Path) -> Result<()> {
    persist_with(dest, |tmp| io::Write::write_all(tmp, body))
}

fn persist_with(dest: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| Error::msg(format!("invalid output path {}", dest.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::io_at("create temp file in", dir, e))?;
    fill(tmp.as_file_mut()).map_err(|e| Error::io_at("write", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io_at("sync", tmp.path(), e))?;
    let tmp_path = tmp.path().to_path_buf();
    tmp.persist(dest)
        .map_err(|e| Error::io_at("persist", &tmp_path, e.error))?;
    util::set_mode(dest, 0o644)
}
