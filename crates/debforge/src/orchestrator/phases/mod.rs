use debforge_macros::Pipeline;

pub mod build;
pub mod clean;
pub mod configure;
pub mod install;
pub mod package;

/// The Debian binary-package workflow.
#[Pipeline(phases = [
    clean::CleanPhase,
    configure::ConfigurePhase,
    build::BuildPhase,
    install::InstallPhase,
    package::PackagePhase,
])]
pub struct PackagingPipeline;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDoc;
    use crate::orchestrator::PhaseName;

    #[test]
    fn plan_uses_configured_labels_and_covers_every_phase() {
        let doc = ConfigDoc::from_toml_str(
            "debforge.toml",
            "[phases.build]\nlabel = \"Build wheel\"\n",
        )
        .expect("doc");
        let plan = PackagingPipeline::plan(&doc).expect("plan");
        let labels: Vec<(PhaseName, &str)> =
            plan.ordered().map(|p| (p.phase, p.label.as_str())).collect();
        assert_eq!(labels.len(), 5);
        assert_eq!(labels[2], (PhaseName::Build, "Build wheel"));
        assert_eq!(labels[0], (PhaseName::Clean, clean::CleanPhase::DEFAULT_LABEL));
        assert_eq!(
            plan.get(PhaseName::Package).map(|p| p.config_path.as_str()),
            Some("phases.package")
        );

        let reg = PackagingPipeline::registry().expect("registry");
        assert!(PhaseName::ALL.iter().all(|p| reg.get(*p).is_some()));
    }
}
