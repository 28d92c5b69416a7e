use debforge_macros::Phase;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ConfigDoc;
use crate::descriptor::{self, BuildRule, Dependency, PackageSpec};
use crate::error::Result;
use crate::orchestrator::{PhaseCtx, PhaseName};
use crate::provision::BuildEnvironment;

#[Phase(phase = PhaseName::Configure, default_label = "Read packaging descriptor")]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigurePhase {
    label: Option<String>,
    /// Overrides the rule detected from `debian/rules`.
    build_rule: Option<BuildRule>,
}

impl ConfigurePhase {
    fn run(cfg: &Self, _doc: &ConfigDoc, ctx: &mut PhaseCtx<'_>) -> Result<()> {
        let spec = descriptor::read_descriptor(&ctx.source.descriptor_dir, cfg.build_rule)?;
        info!(
            package = %spec.name,
            version = %spec.version,
            arch = %spec.architecture,
            rule = %spec.build_rule,
            "descriptor read"
        );
        ctx.exec.log(&format!(
            "package {} {} ({}), build rule {}",
            spec.name, spec.version, spec.architecture, spec.build_rule
        ));

        for dep in uncovered_build_depends(&spec, ctx.env) {
            warn!(dependency = %dep, "Build-Depends entry not provided by the build environment");
            ctx.exec
                .log(&format!("warning: Build-Depends '{dep}' is not a provisioned capability"));
        }

        ctx.spec = Some(spec);
        Ok(())
    }
}

/// Build-Depends entries none of whose alternatives the environment provides.
/// `debhelper-compat` is satisfied by `debhelper`.
fn uncovered_build_depends<'s>(spec: &'s PackageSpec, env: &BuildEnvironment) -> Vec<&'s Dependency> {
    spec.build_depends
        .iter()
        .filter(|dep| {
            !dep.names().any(|n| {
                let n = if n == "debhelper-compat" { "debhelper" } else { n };
                env.provides(n)
            })
        })
        .collect()
}
