use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use debforge_macros::Phase;
use serde::Deserialize;
use walkdir::WalkDir;

use super::build::BuildPhase;
use crate::config::ConfigDoc;
use crate::descriptor::MAINTAINER_SCRIPTS;
use crate::error::{Error, Result};
use crate::orchestrator::{PhaseCtx, PhaseName};
use crate::util;

#[Phase(phase = PhaseName::Install, default_label = "Install into package root")]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstallPhase {
    label: Option<String>,
    /// Replaces the build rule's default install command.
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

impl InstallPhase {
    fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()> {
        let spec = ctx.spec()?;

        for rel in BuildPhase::load(doc)?.expected_outputs(spec) {
            util::validate_rel_path(&rel)?;
            let path = ctx.source.root.join(rel.trim());
            if fs::symlink_metadata(&path).is_err() {
                return Err(Error::layout(format!(
                    "expected build output '{rel}' is missing from {}",
                    ctx.source.root.display()
                )));
            }
        }

        util::ensure_dir(&ctx.layout.package_root)?;
        let argv = if cfg.command.is_empty() {
            spec.build_rule.default_install_command()
        } else {
            cfg.command.clone()
        };
        let cmd = ctx.command(&argv, &cfg.env)?;
        let out = ctx.exec.run(&cmd)?;
        if !out.success() {
            return Err(Error::BuildStep {
                command: cmd.display(),
                status: out.status,
                output: out.output.render(),
            });
        }

        if !contains_files(&ctx.layout.package_root) {
            return Err(Error::layout(format!(
                "install left the package root {} empty",
                ctx.layout.package_root.display()
            )));
        }

        let debian = ctx.layout.package_root.join("DEBIAN");
        let descriptor_dir = &ctx.source.descriptor_dir;
        for script in MAINTAINER_SCRIPTS {
            let src = descriptor_dir.join(script);
            if src.is_file() {
                let dst = debian.join(script);
                copy_file(&src, &dst)?;
                util::set_mode(&dst, 0o755)?;
                ctx.exec.log(&format!("maintainer script {script}"));
            }
        }
        let conffiles = descriptor_dir.join("conffiles");
        if conffiles.is_file() {
            let dst = debian.join("conffiles");
            copy_file(&conffiles, &dst)?;
            util::set_mode(&dst, 0o644)?;
        }
        let copyright = descriptor_dir.join("copyright");
        if copyright.is_file() {
            let dst = ctx
                .layout
                .package_root
                .join("usr/share/doc")
                .join(&spec.name)
                .join("copyright");
            copy_file(&copyright, &dst)?;
            util::set_mode(&dst, 0o644)?;
        }
        Ok(())
    }
}

fn contains_files(root: &Path) -> bool {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| !e.file_type().is_dir())
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        util::ensure_dir(parent)?;
    }
    fs::copy(src, dst).map_err(|e| Error::io_at("copy", src, e))?;
    Ok(())
}
