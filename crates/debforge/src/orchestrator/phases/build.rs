use std::collections::BTreeMap;

use debforge_macros::Phase;
use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::descriptor::PackageSpec;
use crate::error::{Error, Result};
use crate::orchestrator::{PhaseCtx, PhaseName};
use crate::util;

#[Phase(phase = PhaseName::Build, default_label = "Build application")]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildPhase {
    label: Option<String>,
    /// Replaces the build rule's default command.
    command: Vec<String>,
    /// Paths (relative to the staged source) the build must produce.
    /// Defaults to the build rule's outputs.
    outputs: Option<Vec<String>>,
    env: BTreeMap<String, String>,
}

impl BuildPhase {
    /// Checked by install before anything is copied into the package root.
    pub fn expected_outputs(&self, spec: &PackageSpec) -> Vec<String> {
        self.outputs
            .clone()
            .unwrap_or_else(|| spec.build_rule.default_outputs())
    }

    fn run(cfg: &Self, _doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()> {
        let spec = ctx.spec()?;
        let argv = if cfg.command.is_empty() {
            spec.build_rule.default_build_command()
        } else {
            cfg.command.clone()
        };
        util::ensure_dir(&ctx.layout.build_output)?;

        let cmd = ctx.command(&argv, &cfg.env)?;
        let out = ctx.exec.run(&cmd)?;
        if !out.success() {
            return Err(Error::BuildStep {
                command: cmd.display(),
                status: out.status,
                output: out.output.render(),
            });
        }
        Ok(())
    }
}
