use std::collections::BTreeMap;
use std::path::Path;

use debforge_macros::Phase;
use filetime::FileTime;
use serde::Deserialize;
use tracing::info;
use walkdir::WalkDir;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::orchestrator::{PhaseCtx, PhaseName};
use crate::util;

fn default_command() -> Vec<String> {
    ["dpkg-deb", "--root-owner-group", "--build", "{package_root}", "{archive}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[Phase(phase = PhaseName::Package, default_label = "Assemble package archive")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackagePhase {
    label: Option<String>,
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

impl Default for PackagePhase {
    fn default() -> Self {
        Self {
            label: None,
            command: default_command(),
            env: BTreeMap::new(),
        }
    }
}

impl PackagePhase {
    fn run(cfg: &Self, _doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()> {
        let spec = ctx.spec()?;
        let meta = spec.validate_for_packaging()?;
        let package_root = &ctx.layout.package_root;

        let control = spec.render_control(&meta, installed_size_kib(package_root));
        let debian = package_root.join("DEBIAN");
        util::write_text(&debian.join("control"), &control)?;
        util::set_mode(&debian, 0o755)?;
        util::set_mode(&debian.join("control"), 0o644)?;

        normalize_mtimes(package_root, ctx.source_date_epoch())?;

        let archive = ctx.archive_path()?;
        util::ensure_dir(&ctx.layout.archives)?;
        let cmd = ctx.command(&cfg.command, &cfg.env)?;
        let out = match ctx.exec.run(&cmd) {
            Ok(out) => out,
            Err(e) => {
                return Err(Error::packaging(format!(
                    "packaging tool `{}` could not run: {e}",
                    cmd.program
                )));
            }
        };
        if !out.success() {
            util::remove_path(&archive)?;
            return Err(Error::Packaging {
                detail: format!(
                    "`{}` failed ({})",
                    cmd.display(),
                    out.status
                        .map(|c| format!("exit status {c}"))
                        .unwrap_or_else(|| "terminated by signal".into())
                ),
                output: out.output.render(),
            });
        }

        info!(archive = %archive.display(), "archive assembled");
        ctx.exec.log(&format!("wrote {}", archive.display()));
        ctx.archive = Some(archive);
        Ok(())
    }
}

/// `Installed-Size` in KiB: file sizes rounded up per file, `DEBIAN/` excluded.
fn installed_size_kib(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == "DEBIAN"))
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len().div_ceil(1024).max(1))
        .sum()
}

/// Clamps every mtime in the tree to `epoch` so archives are reproducible.
fn normalize_mtimes(root: &Path, epoch: i64) -> Result<()> {
    let t = FileTime::from_unix_time(epoch, 0);
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| Error::msg(format!("walk {}: {e}", root.display())))?;
        filetime::set_symlink_file_times(entry.path(), t, t)
            .map_err(|e| Error::io_at("set mtime on", entry.path(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn installed_size_skips_control_area() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("usr/bin")).expect("mkdir");
        fs::create_dir_all(root.join("DEBIAN")).expect("mkdir");
        fs::write(root.join("usr/bin/tool"), vec![0u8; 1500]).expect("write");
        fs::write(root.join("usr/bin/empty"), b"").expect("write");
        fs::write(root.join("DEBIAN/control"), vec![0u8; 4096]).expect("write");
        assert_eq!(installed_size_kib(root), 3);
    }

    #[test]
    fn mtimes_are_clamped_to_epoch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("usr/share")).expect("mkdir");
        fs::write(tmp.path().join("usr/share/a"), "a").expect("write");
        normalize_mtimes(tmp.path(), 1_709_640_000).expect("normalize");

        for p in ["usr", "usr/share", "usr/share/a"] {
            let meta = fs::metadata(tmp.path().join(p)).expect("meta");
            assert_eq!(
                FileTime::from_last_modification_time(&meta).unix_seconds(),
                1_709_640_000,
                "{p}"
            );
        }
    }
}
