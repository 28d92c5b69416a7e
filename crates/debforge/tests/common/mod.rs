#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};

use debforge::config::ConfigDoc;
use debforge::executor::{ChannelSink, CommandOutput, CommandRunner, CommandSpec, ExecEvent};
use debforge::{Error, Result};
use filetime::FileTime;
use walkdir::WalkDir;

pub const CONTROL: &str = "\
Source: wordfence
Section: utils
Priority: optional
Maintainer: Wordfence <opensource@wordfence.com>
Build-Depends: debhelper-compat (= 13), dh-python, python3-all, python3-setuptools

Package: wordfence
Architecture: all
Depends: ${python3:Depends}, ${misc:Depends}, python3-requests (>= 2.3)
Description: Wordfence malware scanner
 Command line malware scanner for servers.
";

pub const RULES: &str = "#!/usr/bin/make -f\n%:\n\tdh $@ --with python3 --buildsystem=pybuild\n";

pub fn changelog(version: &str) -> String {
    format!(
        "wordfence ({version}) stable; urgency=medium\n\n  * Release {version}.\n\n -- Wordfence <opensource@wordfence.com>  Tue, 05 Mar 2024 12:00:00 +0000\n"
    )
}

/// A small Python application with a complete `debian/` descriptor.
pub fn write_project(root: &Path, control: &str, changelog: &str) {
    let debian = root.join("debian");
    fs::create_dir_all(&debian).unwrap();
    fs::create_dir_all(root.join("wordfence")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(root.join("setup.py"), "from setuptools import setup\nsetup(name='wordfence')\n").unwrap();
    fs::write(root.join("wordfence/__init__.py"), "__version__ = '1.2.0'\n").unwrap();
    fs::write(debian.join("control"), control).unwrap();
    fs::write(debian.join("changelog"), changelog).unwrap();
    fs::write(debian.join("rules"), RULES).unwrap();
    fs::write(debian.join("copyright"), "Format: dep5\n").unwrap();
    fs::write(debian.join("postinst"), "#!/bin/sh\nset -e\n").unwrap();
}

pub fn doc(root: &Path, raw: &str) -> ConfigDoc {
    ConfigDoc::from_toml_str(root.join("debforge.toml"), raw).unwrap()
}

pub fn channel() -> (Arc<ChannelSink>, mpsc::Receiver<ExecEvent>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelSink::new(tx)), rx)
}

pub fn phases_started(events: &[ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ExecEvent::PhaseStarted { phase } => Some(phase.clone()),
            _ => None,
        })
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let Ok(rd) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = rd
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Scripted stand-in for the Debian toolchain. Programs without a handler
/// fail to start, like a tool missing from `PATH`.
pub struct FakeRunner {
    handlers: BTreeMap<String, Handler>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Probes succeed, pybuild writes a module tree, dpkg-deb writes a
    /// deterministic archive listing the package root.
    pub fn debian_toolchain() -> Self {
        Self::new()
            .on("python3", |_| CommandOutput::exited(0).with_line("Python 3.11.2"))
            .on("dpkg-query", |_| CommandOutput::exited(0))
            .on("dpkg-deb", fake_dpkg_deb)
            .on("pybuild", fake_pybuild)
    }

    pub fn on(
        mut self,
        program: &str,
        f: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(program.to_string(), Box::new(f));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, program: &str, first_arg: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| c.program == program && c.args.first().map(String::as_str) == Some(first_arg))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(&str)) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let Some(handler) = self.handlers.get(&spec.program) else {
            return Err(Error::msg(format!(
                "failed to start `{}`: No such file or directory",
                spec.program
            )));
        };
        let out = handler(spec);
        for line in out.output.lines() {
            on_line(line);
        }
        Ok(out)
    }
}

fn arg_after<'a>(spec: &'a CommandSpec, flag: &str) -> Option<&'a str> {
    spec.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| spec.args.get(i + 1))
        .map(String::as_str)
}

fn fake_pybuild(spec: &CommandSpec) -> CommandOutput {
    let source = PathBuf::from(arg_after(spec, "--dir").unwrap_or("."));
    match spec.args.first().map(String::as_str) {
        Some("--build") => {
            let out = source.join(".pybuild/cpython3_3.11/build/wordfence");
            fs::create_dir_all(&out).unwrap();
            fs::copy(source.join("wordfence/__init__.py"), out.join("__init__.py")).unwrap();
            CommandOutput::exited(0).with_line("I: pybuild base:240: python3.11 setup.py build")
        }
        Some("--install") => {
            let dest = PathBuf::from(arg_after(spec, "--dest-dir").unwrap());
            let pkg = dest.join("usr/lib/python3/dist-packages/wordfence");
            fs::create_dir_all(&pkg).unwrap();
            fs::copy(
                source.join(".pybuild/cpython3_3.11/build/wordfence/__init__.py"),
                pkg.join("__init__.py"),
            )
            .unwrap();
            fs::create_dir_all(dest.join("usr/bin")).unwrap();
            fs::write(dest.join("usr/bin/wordfence"), "#!/usr/bin/python3\n").unwrap();
            CommandOutput::exited(0)
        }
        _ => CommandOutput::exited(2).with_line("pybuild: unsupported invocation"),
    }
}

/// `dpkg-deb --root-owner-group --build <root> <archive>`: the archive is a
/// listing of paths, mtimes and contents, so any nondeterminism in the
/// package root shows up as a byte difference.
fn fake_dpkg_deb(spec: &CommandSpec) -> CommandOutput {
    if spec.args.first().map(String::as_str) == Some("--version") {
        return CommandOutput::exited(0).with_line("Debian 'dpkg-deb' package management program version 1.21.22");
    }
    let Some(root) = arg_after(spec, "--build") else {
        return CommandOutput::exited(2).with_line("dpkg-deb: error: need --build");
    };
    let root = PathBuf::from(root);
    let Some(archive) = spec.args.last() else {
        return CommandOutput::exited(2);
    };
    if !root.join("DEBIAN/control").is_file() {
        return CommandOutput::exited(2).with_line("dpkg-deb: error: missing control file");
    }

    let mut body = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(&root).unwrap().display().to_string();
        let meta = entry.metadata().unwrap();
        let mtime = FileTime::from_last_modification_time(&meta).unix_seconds();
        body.extend_from_slice(format!("{rel} {mtime}\n").as_bytes());
        if meta.is_file() {
            body.extend_from_slice(&fs::read(entry.path()).unwrap());
        }
    }
    fs::write(archive, body).unwrap();
    CommandOutput::exited(0).with_line(&format!("dpkg-deb: building package 'wordfence' in '{archive}'."))
}
