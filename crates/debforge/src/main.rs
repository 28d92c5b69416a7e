use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use debforge::config::{self, ConfigDoc};
use debforge::controller::{self, Failure, RunOptions, Stage};
use debforge::executor::{ExecSink, StdoutSink, SystemRunner};
use debforge::orchestrator::phases::PackagingPipeline;
use debforge::workspace::{self, WorkspaceConfig};
use debforge::{Error, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Build definition TOML (default: ./debforge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Discard a leftover staging root from a previous run
    #[arg(long, global = true)]
    clean: bool,
    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision, stage, build and collect the package (default)
    Run,
    /// Print the phase plan
    Plan,
    /// Print the fully-resolved build definition (after extends)
    Resolve,
    /// Provision the build environment only
    Check,
    /// Run a command instead of the packaging sequence
    Exec {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        cmd: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json);

    let res = match args.cmd.unwrap_or(Command::Run) {
        Command::Exec { cmd } => return cmd_exec(&cmd),
        Command::Run => load(args.config.as_deref()).and_then(|doc| cmd_run(&doc, args.clean)),
        Command::Plan => load(args.config.as_deref()).and_then(|doc| cmd_plan(&doc)),
        Command::Resolve => load(args.config.as_deref()).and_then(|doc| cmd_resolve(&doc)),
        Command::Check => load(args.config.as_deref()).and_then(|doc| cmd_check(&doc)),
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => report(failure),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let _ = dotenv::dotenv();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

/// `RUST_LOG` wins when set and valid; `--verbose` only raises the default.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let default = if verbose { "debug" } else { "warn" };
    rust_log
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn report(failure: Failure) -> ExitCode {
    eprintln!("{}", failure.report());
    ExitCode::from(failure.exit_code())
}

fn load(path: Option<&Path>) -> std::result::Result<ConfigDoc, Failure> {
    config::load_or_default(path).map_err(setup)
}

fn setup(error: Error) -> Failure {
    Failure {
        stage: Stage::Setup,
        error,
    }
}

/// Progress sink writing phase error logs under the build dir when the
/// workspace paths resolve; otherwise plain stdout.
fn stdout_sink(doc: &ConfigDoc) -> Arc<dyn ExecSink> {
    let paths = WorkspaceConfig::load(doc).and_then(|cfg| workspace::load_paths(doc, &cfg));
    match paths {
        Ok(p) => Arc::new(StdoutSink::with_error_logs(p.error_logs_dir())),
        Err(_) => Arc::new(StdoutSink::default()),
    }
}

fn cmd_run(doc: &ConfigDoc, clean: bool) -> std::result::Result<(), Failure> {
    let artifact = controller::run(
        doc,
        Arc::new(SystemRunner),
        stdout_sink(doc),
        &RunOptions { clean },
    )?;
    println!("ARTIFACT: {}", artifact.path.display());
    Ok(())
}

fn cmd_plan(doc: &ConfigDoc) -> std::result::Result<(), Failure> {
    let plan = PackagingPipeline::plan(doc).map_err(setup)?;
    for phase in plan.ordered() {
        println!(
            "{:>2}. {:<10} {:<18} {}",
            phase.phase.ordinal(),
            phase.phase,
            phase.config_path,
            phase.label
        );
    }
    Ok(())
}

fn cmd_resolve(doc: &ConfigDoc) -> std::result::Result<(), Failure> {
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}

fn cmd_check(doc: &ConfigDoc) -> std::result::Result<(), Failure> {
    let env = controller::check(doc, Arc::new(SystemRunner), stdout_sink(doc))?;
    for cap in env.capabilities() {
        println!(
            "{:<20} {:<8} {:<20} {:?}{}",
            cap.name,
            cap.kind.as_str(),
            cap.package,
            cap.status,
            if cap.required { "" } else { " (optional)" }
        );
    }
    Ok(())
}

/// Pass-through mode: the packaging sequence is replaced by `cmd`.
fn cmd_exec(cmd: &[String]) -> ExitCode {
    match spawn_inherited(cmd) {
        Ok(code) => ExitCode::from(code),
        Err(error) => report(setup(error)),
    }
}

fn spawn_inherited(cmd: &[String]) -> Result<u8> {
    let Some((program, args)) = cmd.split_first() else {
        return Err(Error::config("exec needs a command"));
    };
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::msg(format!("failed to start `{program}`: {e}")))?;
    Ok(match status.code() {
        Some(code) => u8::try_from(code).unwrap_or(1),
        None => 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_is_honoured_with_and_without_verbose() {
        assert_eq!(log_filter(true, Some("debforge=trace")).to_string(), "debforge=trace");
        assert_eq!(log_filter(false, Some("debforge=trace")).to_string(), "debforge=trace");
    }

    #[test]
    fn verbose_raises_the_default_level() {
        assert_eq!(log_filter(true, None).to_string(), "debug");
        assert_eq!(log_filter(false, None).to_string(), "warn");
        assert_eq!(log_filter(true, Some("")).to_string(), "debug");
    }
}
