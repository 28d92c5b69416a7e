use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use tracing::debug;

use crate::error::{Error, Result};
use crate::log_sanitize::{OutputTail, sanitize_output_line};

/// One external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Builds a spec from an argv vector; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::config("command is empty"));
        };
        if program.trim().is_empty() {
            return Err(Error::config("command program is empty"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            ..Self::default()
        })
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| {
                if s.is_empty() || s.contains(char::is_whitespace) {
                    format!("'{s}'")
                } else {
                    s.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Structured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub output: OutputTail,
}

impl CommandOutput {
    pub fn exited(code: i32) -> Self {
        Self {
            status: Some(code),
            output: OutputTail::default(),
        }
    }

    pub fn with_line(mut self, line: &str) -> Self {
        self.output.push(line);
        self
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external tools. `Err` means the command could not be started at all;
/// a command that ran and failed is an `Ok` with a non-zero status.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(&str)) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&spec.env);
        debug!(command = %spec.display(), cwd = ?spec.cwd, "spawning");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to start `{}`: {e}", spec.program)))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        let mut output = OutputTail::default();
        for line in rx {
            let line = sanitize_output_line(&line);
            if line.is_empty() {
                continue;
            }
            on_line(&line);
            output.push(&line);
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait for `{}` failed: {e}", spec.program)))?;
        Ok(CommandOutput {
            status: status.code(),
            output,
        })
    }
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    StageStarted {
        stage: String,
    },
    PhaseStarted {
        phase: String,
    },
    Log {
        scope: String,
        line: String,
    },
    PhaseFinished {
        phase: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    RunDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Prints progress to stdout. Failed phases get their log tail written to
/// `error_logs_root/<timestamp>/<phase>.log` when a root is set.
#[derive(Default)]
pub struct StdoutSink {
    error_logs_root: Option<PathBuf>,
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    phases_ok: usize,
    phases_failed: usize,
    log_lines: usize,
    scope_logs: BTreeMap<String, VecDeque<String>>,
    error_logs_dir: Option<PathBuf>,
    error_log_paths: Vec<PathBuf>,
}

impl StdoutSink {
    pub fn with_error_logs(root: impl Into<PathBuf>) -> Self {
        Self {
            error_logs_root: Some(root.into()),
            state: Mutex::default(),
        }
    }

    fn write_error_log(
        &self,
        s: &mut StdoutSinkState,
        phase: &str,
        error: Option<&str>,
        elapsed_ms: u128,
    ) -> Result<Option<PathBuf>> {
        let Some(root) = self.error_logs_root.as_ref() else {
            return Ok(None);
        };
        let dir = match s.error_logs_dir.as_ref() {
            Some(d) => d.clone(),
            None => {
                let d = root.join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
                fs::create_dir_all(&d).map_err(|e| Error::io_at("create dir", &d, e))?;
                s.error_logs_dir = Some(d.clone());
                d
            }
        };

        let path = dir.join(format!("{phase}.log"));
        let mut body = format!("phase: {phase}\nstatus: failed\nelapsed_ms: {elapsed_ms}\n");
        if let Some(e) = error.filter(|e| !e.trim().is_empty()) {
            body.push_str(&format!("error: {e}\n"));
        }
        body.push_str("\nlogs:\n");
        for line in s.scope_logs.get(phase).into_iter().flatten() {
            body.push_str(line);
            body.push('\n');
        }
        fs::write(&path, body).map_err(|e| Error::io_at("write", &path, e))?;
        s.error_log_paths.push(path.clone());
        Ok(Some(path))
    }
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        match ev {
            ExecEvent::StageStarted { stage } => {
                if s.started_at.is_none() {
                    s.started_at = Some(Instant::now());
                }
                println!("STAGE: {stage}");
            }
            ExecEvent::PhaseStarted { phase } => println!("RUN: {phase}"),
            ExecEvent::Log { scope, line } => {
                const MAX_LINES: usize = 4000;
                s.log_lines = s.log_lines.saturating_add(1);
                let q = s.scope_logs.entry(scope.clone()).or_default();
                while q.len() >= MAX_LINES {
                    q.pop_front();
                }
                q.push_back(line.clone());
                println!("[{scope}] {line}");
            }
            ExecEvent::PhaseFinished {
                phase,
                ok,
                error,
                elapsed_ms,
            } => {
                if ok {
                    s.phases_ok += 1;
                    s.scope_logs.remove(&phase);
                    println!("DONE: {phase} ({elapsed_ms}ms)");
                    return;
                }
                s.phases_failed += 1;
                println!(
                    "FAIL: {phase} ({elapsed_ms}ms) {}",
                    error.as_deref().unwrap_or_default()
                );
                match self.write_error_log(&mut s, &phase, error.as_deref(), elapsed_ms) {
                    Ok(Some(path)) => println!("ERROR_LOG: {phase} => {}", path.display()),
                    Ok(None) => {}
                    Err(e) => println!("WARN: failed to write error log for {phase}: {e}"),
                }
            }
            ExecEvent::RunDone { ok, error } => {
                let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                println!("SUMMARY:");
                println!("  status: {}", if ok { "ok" } else { "failed" });
                println!(
                    "  phases: ok={} failed={}",
                    s.phases_ok, s.phases_failed
                );
                println!("  logs: {}", s.log_lines);
                println!("  elapsed: {}", format_elapsed_hms(wall.as_secs()));
                if let Some(e) = error {
                    println!("  error: {e}");
                }
                for p in &s.error_log_paths {
                    println!("  error_log: {}", p.display());
                }
                *s = StdoutSinkState::default();
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Handles shared by every stage of one invocation.
#[derive(Clone)]
pub struct ExecCtx {
    pub sink: Arc<dyn ExecSink>,
    pub runner: Arc<dyn CommandRunner>,
    scope: String,
}

impl ExecCtx {
    pub fn new(runner: Arc<dyn CommandRunner>, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            sink,
            runner,
            scope: "debforge".into(),
        }
    }

    pub fn set_scope(&mut self, scope: impl Into<String>) {
        self.scope = scope.into();
    }

    pub fn log(&self, msg: &str) {
        self.sink.emit(ExecEvent::Log {
            scope: self.scope.clone(),
            line: msg.to_string(),
        });
    }

    /// Runs a command, streaming its output into the current scope's log.
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.log(&format!("$ {}", spec.display()));
        let sink = Arc::clone(&self.sink);
        let scope = self.scope.clone();
        let mut on_line = |line: &str| {
            sink.emit(ExecEvent::Log {
                scope: scope.clone(),
                line: line.to_string(),
            })
        };
        self.runner.run(spec, &mut on_line)
    }
}

fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
