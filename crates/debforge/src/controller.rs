//! The outermost driver: provision, stage, orchestrate, collect.
//!
//! This is the only place where an error is tied to the stage it came from
//! and turned into a process exit code.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::collect::{self, Artifact};
use crate::config::ConfigDoc;
use crate::error::Error;
use crate::executor::{CommandRunner, ExecCtx, ExecEvent, ExecSink};
use crate::orchestrator::{self, PhaseName, phases::PackagingPipeline};
use crate::provision::{self, BuildEnvironment, EnvironmentConfig};
use crate::stage::{self, SourceConfig};
use crate::workspace::{self, WorkspaceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the build definition, before anything touches the system.
    Setup,
    Provision,
    Stage,
    Phase(PhaseName),
    Collect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => f.write_str("setup"),
            Stage::Provision => f.write_str("provision"),
            Stage::Stage => f.write_str("stage"),
            Stage::Phase(p) => write!(f, "{p}"),
            Stage::Collect => f.write_str("collect"),
        }
    }
}

/// A failed invocation: the originating stage and its unmodified error.
#[derive(Debug)]
pub struct Failure {
    pub stage: Stage,
    pub error: Error,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Failure {
        move |error| Failure { stage, error }
    }

    pub fn exit_code(&self) -> u8 {
        self.error.kind().exit_code()
    }

    /// Human-readable report for stderr, including captured tool output.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        if let Some(output) = self.error.output() {
            out.push_str("\ncaptured output:");
            for line in output.lines() {
                out.push_str("\n  ");
                out.push_str(line);
            }
        }
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error: stage={} kind={}: {}",
            self.stage,
            self.error.kind(),
            self.error
        )
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Discard a leftover staging root instead of failing on it.
    pub clean: bool,
}

/// Provisioning only; used by `debforge check`.
pub fn check(
    doc: &ConfigDoc,
    runner: Arc<dyn CommandRunner>,
    sink: Arc<dyn ExecSink>,
) -> Result<BuildEnvironment, Failure> {
    let mut ctx = ExecCtx::new(runner, sink);
    let res = provision_stage(doc, &mut ctx);
    finish(&ctx, res.as_ref().map(|_| ()).map_err(|f| f.to_string()));
    res
}

/// Runs the full sequence. Exactly one artifact on success, none on failure.
pub fn run(
    doc: &ConfigDoc,
    runner: Arc<dyn CommandRunner>,
    sink: Arc<dyn ExecSink>,
    opts: &RunOptions,
) -> Result<Artifact, Failure> {
    let mut ctx = ExecCtx::new(runner, sink);
    let res = run_stages(doc, &mut ctx, opts);
    finish(&ctx, res.as_ref().map(|_| ()).map_err(|f| f.to_string()));
    res
}

fn finish(ctx: &ExecCtx, res: Result<(), String>) {
    ctx.sink.emit(ExecEvent::RunDone {
        ok: res.is_ok(),
        error: res.err(),
    });
}

fn enter(ctx: &mut ExecCtx, stage: Stage) {
    ctx.set_scope(stage.to_string());
    ctx.sink.emit(ExecEvent::StageStarted {
        stage: stage.to_string(),
    });
    info!(%stage, "stage started");
}

fn provision_stage(doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<BuildEnvironment, Failure> {
    let env_cfg = EnvironmentConfig::load(doc).map_err(Failure::at(Stage::Setup))?;
    enter(ctx, Stage::Provision);
    let env = provision::provision(&env_cfg, ctx).map_err(Failure::at(Stage::Provision))?;
    env.ensure_ready().map_err(Failure::at(Stage::Provision))?;
    Ok(env)
}

fn run_stages(doc: &ConfigDoc, ctx: &mut ExecCtx, opts: &RunOptions) -> Result<Artifact, Failure> {
    let ws_cfg = WorkspaceConfig::load(doc).map_err(Failure::at(Stage::Setup))?;
    let paths = workspace::load_paths(doc, &ws_cfg).map_err(Failure::at(Stage::Setup))?;
    let src_cfg = SourceConfig::load(doc).map_err(Failure::at(Stage::Setup))?;
    let plan = PackagingPipeline::plan(doc).map_err(Failure::at(Stage::Setup))?;
    let reg = PackagingPipeline::registry().map_err(Failure::at(Stage::Setup))?;

    let env = provision_stage(doc, ctx)?;

    enter(ctx, Stage::Stage);
    workspace::apply_clean(&paths, ws_cfg.clean).map_err(Failure::at(Stage::Stage))?;
    let clean_rerun = opts.clean || ws_cfg.clean.cleans_staging();
    let (layout, source) = stage::stage_source(&src_cfg, &paths, clean_rerun, ctx)
        .map_err(Failure::at(Stage::Stage))?;

    let report = orchestrator::run(doc, &plan, &reg, &env, &source, &layout, ctx);
    let failed_at = report
        .failed_phase()
        .map(Stage::Phase)
        .unwrap_or(Stage::Provision);
    let (spec, _archive) = report.finish().map_err(Failure::at(failed_at))?;

    enter(ctx, Stage::Collect);
    let artifact =
        collect::collect(&layout, &spec, &paths.out_dir).map_err(Failure::at(Stage::Collect))?;
    ctx.log(&format!("artifact {}", artifact.path.display()));

    if ws_cfg.keep_staging {
        ctx.log(&format!("keeping staging root {}", layout.root.display()));
    } else if let Err(e) = stage::discard(&paths) {
        warn!(error = %e, "failed to discard staging root");
    }
    Ok(artifact)
}
