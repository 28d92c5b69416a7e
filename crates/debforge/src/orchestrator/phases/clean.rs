use std::fs;
use std::path::Path;

use debforge_macros::Phase;
use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::orchestrator::{PhaseCtx, PhaseName};
use crate::util;

fn default_paths() -> Vec<String> {
    [".pybuild", "build", "dist", "*.egg-info"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[Phase(phase = PhaseName::Clean, default_label = "Remove previous build products")]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanPhase {
    label: Option<String>,
    /// In-tree build products, relative to the staged source. A single `*`
    /// matches within one top-level name.
    paths: Vec<String>,
}

impl Default for CleanPhase {
    fn default() -> Self {
        Self {
            label: None,
            paths: default_paths(),
        }
    }
}

impl CleanPhase {
    fn run(cfg: &Self, _doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()> {
        for dir in [
            &ctx.layout.package_root,
            &ctx.layout.build_output,
            &ctx.layout.archives,
        ] {
            if dir.exists() {
                ctx.exec.log(&format!("removing {}", dir.display()));
                util::remove_path(dir)?;
            }
        }

        for raw in &cfg.paths {
            util::validate_rel_path(raw)?;
            for path in matching_paths(&ctx.source.root, raw.trim())? {
                ctx.exec.log(&format!("removing {}", path.display()));
                util::remove_path(&path)?;
            }
        }
        Ok(())
    }
}

fn matching_paths(root: &Path, pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    let Some((prefix, suffix)) = pattern.split_once('*') else {
        let p = root.join(pattern);
        return Ok(if fs::symlink_metadata(&p).is_ok() {
            vec![p]
        } else {
            Vec::new()
        });
    };
    if suffix.contains('*') || prefix.contains('/') || suffix.contains('/') {
        return Err(Error::config(format!(
            "clean pattern '{pattern}' may contain one '*' within a top-level name"
        )));
    }
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| Error::io_at("read dir", root, e))? {
        let entry = entry.map_err(|e| Error::io_at("read dir", root, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.len() >= prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix)
        {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_top_level_names_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("wordfence.egg-info")).expect("mkdir");
        fs::create_dir_all(tmp.path().join("src/nested.egg-info")).expect("mkdir");
        fs::write(tmp.path().join("setup.py"), "").expect("write");

        let hits = matching_paths(tmp.path(), "*.egg-info").expect("match");
        assert_eq!(hits, vec![tmp.path().join("wordfence.egg-info")]);
        assert!(matching_paths(tmp.path(), "dist").expect("match").is_empty());
        assert!(matching_paths(tmp.path(), "src/*.egg-info").is_err());
    }
}
