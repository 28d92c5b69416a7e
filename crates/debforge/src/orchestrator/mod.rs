//! The packaging workflow: clean, configure, build, install, package.
//!
//! Phases run strictly in ordinal order against the staged source and the run
//! halts at the first failure. Nothing is retried.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use crate::config::ConfigDoc;
use crate::descriptor::{FALLBACK_SOURCE_DATE_EPOCH, PackageSpec};
use crate::error::{Error, Result};
use crate::executor::{CommandSpec, ExecCtx, ExecEvent};
use crate::planner::Plan;
use crate::provision::BuildEnvironment;
use crate::stage::{SourceTree, StagingLayout};
use crate::util;

pub mod phases;
pub mod state;

pub use state::{PhaseName, PhaseOutcome, PhaseRecord, RunState};

pub type PhaseExecFn = fn(&ConfigDoc, &mut PhaseCtx<'_>) -> Result<()>;

#[derive(Default)]
pub struct PhaseRegistry {
    exec: BTreeMap<PhaseName, PhaseExecFn>,
}

impl PhaseRegistry {
    pub fn add(&mut self, phase: PhaseName, f: PhaseExecFn) -> Result<()> {
        if self.exec.contains_key(&phase) {
            return Err(Error::msg(format!("duplicate executor for phase '{phase}'")));
        }
        self.exec.insert(phase, f);
        Ok(())
    }

    pub fn get(&self, phase: PhaseName) -> Option<PhaseExecFn> {
        self.exec.get(&phase).copied()
    }
}

/// What a phase can see. The environment and source tree are borrowed
/// read-only; `spec` and `archive` are filled in by configure and package.
pub struct PhaseCtx<'a> {
    pub exec: &'a ExecCtx,
    pub env: &'a BuildEnvironment,
    pub source: &'a SourceTree,
    pub layout: &'a StagingLayout,
    pub spec: Option<PackageSpec>,
    pub archive: Option<PathBuf>,
}

impl<'a> PhaseCtx<'a> {
    pub fn new(
        exec: &'a ExecCtx,
        env: &'a BuildEnvironment,
        source: &'a SourceTree,
        layout: &'a StagingLayout,
    ) -> Self {
        Self {
            exec,
            env,
            source,
            layout,
            spec: None,
            archive: None,
        }
    }

    pub fn spec(&self) -> Result<&PackageSpec> {
        self.spec
            .as_ref()
            .ok_or_else(|| Error::msg("package metadata is not available before configure"))
    }

    pub fn source_date_epoch(&self) -> i64 {
        self.spec
            .as_ref()
            .map(PackageSpec::source_date_epoch)
            .unwrap_or(FALLBACK_SOURCE_DATE_EPOCH)
    }

    pub fn archive_path(&self) -> Result<PathBuf> {
        Ok(self.layout.archives.join(self.spec()?.archive_file_name()))
    }

    /// Placeholders available to command templates. Package placeholders only
    /// exist once configure has read the descriptor.
    pub fn template_vars(&self) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::from([
            ("source", self.source.root.display().to_string()),
            ("package_root", self.layout.package_root.display().to_string()),
            ("build_output", self.layout.build_output.display().to_string()),
        ]);
        if let Some(spec) = &self.spec {
            vars.insert("name", spec.name.clone());
            vars.insert("version", spec.version.to_string());
            vars.insert("arch", spec.architecture.clone());
            vars.insert(
                "archive",
                self.layout
                    .archives
                    .join(spec.archive_file_name())
                    .display()
                    .to_string(),
            );
        }
        vars
    }

    /// Expands a command template into a spec that runs inside the staged
    /// source with the reproducible-build environment.
    pub fn command(&self, argv: &[String], env: &BTreeMap<String, String>) -> Result<CommandSpec> {
        let vars = self.template_vars();
        let argv = argv
            .iter()
            .map(|a| util::expand_template(a, &vars))
            .collect::<Result<Vec<_>>>()?;
        let mut spec = CommandSpec::from_argv(&argv)?.cwd(&self.source.root);
        spec.env
            .insert("SOURCE_DATE_EPOCH".into(), self.source_date_epoch().to_string());
        spec.env.insert("LC_ALL".into(), "C".into());
        spec.env.insert("TZ".into(), "UTC".into());
        for (k, v) in env {
            spec.env.insert(k.clone(), util::expand_template(v, &vars)?);
        }
        Ok(spec)
    }
}

/// Result of one orchestration run.
#[derive(Debug)]
pub struct Orchestration {
    pub state: RunState,
    pub records: Vec<PhaseRecord>,
    pub failure: Option<Error>,
    pub spec: Option<PackageSpec>,
    pub archive: Option<PathBuf>,
}

impl Orchestration {
    pub fn failed_phase(&self) -> Option<PhaseName> {
        match self.state {
            RunState::Failed { phase, .. } => Some(phase),
            _ => None,
        }
    }

    pub fn ran(&self, phase: PhaseName) -> bool {
        self.records.iter().any(|r| r.phase == phase)
    }

    /// The package metadata and archive path of a successful run, or the
    /// error that stopped it.
    pub fn finish(self) -> Result<(PackageSpec, PathBuf)> {
        if let Some(e) = self.failure {
            return Err(e);
        }
        match (self.state, self.spec, self.archive) {
            (RunState::Succeeded, Some(spec), Some(archive)) => Ok((spec, archive)),
            (state, ..) => Err(Error::msg(format!(
                "orchestration ended in state {state} without an archive"
            ))),
        }
    }
}

/// Runs every planned phase in order. Never returns early with `Err`: the
/// outcome, including the first failure, is in the returned report.
pub fn run(
    doc: &ConfigDoc,
    plan: &Plan,
    reg: &PhaseRegistry,
    env: &BuildEnvironment,
    source: &SourceTree,
    layout: &StagingLayout,
    exec: &mut ExecCtx,
) -> Orchestration {
    let mut report = Orchestration {
        state: RunState::Pending,
        records: Vec::new(),
        failure: None,
        spec: None,
        archive: None,
    };

    if let Err(e) = env.ensure_ready().and_then(|()| plan.finalize()) {
        report.failure = Some(e);
        return report;
    }

    let mut pctx_spec: Option<PackageSpec> = None;
    let mut pctx_archive: Option<PathBuf> = None;

    for planned in plan.ordered() {
        let phase = planned.phase;
        if let Err(e) = report.state.transition_to(RunState::Running(phase)) {
            report.failure = Some(e);
            break;
        }
        let Some(exec_fn) = reg.get(phase) else {
            report.failure = Some(Error::msg(format!(
                "no executor registered for phase '{phase}'"
            )));
            break;
        };

        exec.set_scope(phase.as_str());
        exec.sink.emit(ExecEvent::PhaseStarted {
            phase: phase.as_str().to_string(),
        });
        info!(phase = %phase, label = %planned.label, "phase started");

        let start = Instant::now();
        let mut pctx = PhaseCtx::new(exec, env, source, layout);
        pctx.spec = pctx_spec.take();
        pctx.archive = pctx_archive.take();
        let res = exec_fn(doc, &mut pctx);
        pctx_spec = pctx.spec;
        pctx_archive = pctx.archive;
        let elapsed_ms = start.elapsed().as_millis();

        match res {
            Ok(()) => {
                exec.sink.emit(ExecEvent::PhaseFinished {
                    phase: phase.as_str().to_string(),
                    ok: true,
                    error: None,
                    elapsed_ms,
                });
                report.records.push(PhaseRecord {
                    phase,
                    ordinal: phase.ordinal(),
                    outcome: PhaseOutcome::Succeeded,
                    elapsed_ms,
                });
            }
            Err(e) => {
                let kind = e.kind();
                error!(phase = %phase, kind = %kind, error = %e, "phase failed");
                exec.sink.emit(ExecEvent::PhaseFinished {
                    phase: phase.as_str().to_string(),
                    ok: false,
                    error: Some(format!("{kind}: {e}")),
                    elapsed_ms,
                });
                report.records.push(PhaseRecord {
                    phase,
                    ordinal: phase.ordinal(),
                    outcome: PhaseOutcome::Failed(kind),
                    elapsed_ms,
                });
                report.state = RunState::Failed { phase, kind };
                report.failure = Some(e);
                // A failed run never leaves an archive behind.
                pctx_archive = None;
                if let Err(cleanup) = util::remove_path(&layout.archives) {
                    error!(error = %cleanup, "failed to remove partial archives");
                }
                break;
            }
        }
    }

    if report.failure.is_none()
        && let Err(e) = report.state.transition_to(RunState::Succeeded)
    {
        report.failure = Some(e);
    }
    report.spec = pctx_spec;
    report.archive = pctx_archive;
    report
}
