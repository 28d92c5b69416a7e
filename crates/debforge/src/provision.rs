//! Environment provisioning: verify, and if needed install, every declared
//! build-time capability before any phase runs.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::executor::{CommandSpec, ExecCtx};

fn default_true() -> bool {
    true
}

fn default_installer() -> Vec<String> {
    ["apt-get", "install", "-y", "--no-install-recommends"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    #[default]
    Tool,
    Runtime,
    Plugin,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Runtime => "runtime",
            CapabilityKind::Plugin => "plugin",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapabilityDecl {
    pub name: String,
    pub kind: CapabilityKind,
    /// Command that exits 0 when the capability is present.
    pub probe: Vec<String>,
    /// Distribution package providing it; defaults to `name`.
    pub package: Option<String>,
    /// Explicit install command, used instead of `installer + package`.
    pub install: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for CapabilityDecl {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: CapabilityKind::Tool,
            probe: Vec::new(),
            package: None,
            install: Vec::new(),
            required: true,
        }
    }
}

impl CapabilityDecl {
    fn new(name: &str, kind: CapabilityKind, package: &str, probe: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            probe: probe.iter().map(|s| s.to_string()).collect(),
            package: Some(package.into()),
            ..Self::default()
        }
    }

    pub fn package_name(&self) -> &str {
        self.package
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(self.name.as_str())
    }

    fn probe_argv(&self) -> Vec<String> {
        if !self.probe.is_empty() {
            return self.probe.clone();
        }
        match self.kind {
            CapabilityKind::Tool | CapabilityKind::Runtime => {
                vec![self.name.clone(), "--version".into()]
            }
            CapabilityKind::Plugin => vec![
                "dpkg-query".into(),
                "-W".into(),
                self.package_name().to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Argv prefix the package name is appended to.
    pub installer: Vec<String>,
    pub capabilities: Vec<CapabilityDecl>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            installer: default_installer(),
            capabilities: Vec::new(),
        }
    }
}

impl EnvironmentConfig {
    pub fn load(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("environment")?.unwrap_or_default())
    }

    /// Declared capabilities, or the Debian/Python toolchain when none are.
    pub fn effective_capabilities(&self) -> Vec<CapabilityDecl> {
        if !self.capabilities.is_empty() {
            return self.capabilities.clone();
        }
        vec![
            CapabilityDecl::new(
                "dpkg-deb",
                CapabilityKind::Tool,
                "dpkg",
                &["dpkg-deb", "--version"],
            ),
            CapabilityDecl::new(
                "python3",
                CapabilityKind::Runtime,
                "python3",
                &["python3", "--version"],
            ),
            CapabilityDecl::new(
                "python3-setuptools",
                CapabilityKind::Plugin,
                "python3-setuptools",
                &[],
            ),
            CapabilityDecl::new("debhelper", CapabilityKind::Plugin, "debhelper", &[]),
            CapabilityDecl::new("dh-python", CapabilityKind::Plugin, "dh-python", &[]),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStatus {
    /// Already satisfied before provisioning.
    Present,
    /// Installed by this provisioning run.
    Installed,
    /// Absent; only possible for optional capabilities.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityState {
    pub name: String,
    pub kind: CapabilityKind,
    pub package: String,
    pub required: bool,
    pub status: CapabilityStatus,
}

impl CapabilityState {
    pub fn available(&self) -> bool {
        self.status != CapabilityStatus::Missing
    }
}

/// The provisioned toolchain. Built once, never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct BuildEnvironment {
    capabilities: Vec<CapabilityState>,
}

impl BuildEnvironment {
    pub fn from_states(capabilities: Vec<CapabilityState>) -> Self {
        Self { capabilities }
    }

    /// An environment where every named capability is already present.
    pub fn preprovisioned<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_states(
            names
                .into_iter()
                .map(|n| CapabilityState {
                    name: n.to_string(),
                    kind: CapabilityKind::Tool,
                    package: n.to_string(),
                    required: true,
                    status: CapabilityStatus::Present,
                })
                .collect(),
        )
    }

    pub fn capabilities(&self) -> &[CapabilityState] {
        &self.capabilities
    }

    /// Whether a capability or distribution package of that name is available.
    pub fn provides(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.available() && (c.name == name || c.package == name))
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match self
            .capabilities
            .iter()
            .find(|c| c.required && !c.available())
        {
            Some(c) => Err(Error::MissingCapability {
                capability: c.name.clone(),
                detail: "required capability is not installed".into(),
            }),
            None => Ok(()),
        }
    }
}

/// Probes each capability in declaration order, installing missing ones.
/// Stops at the first required capability that cannot be satisfied.
pub fn provision(cfg: &EnvironmentConfig, ctx: &ExecCtx) -> Result<BuildEnvironment> {
    let decls = cfg.effective_capabilities();
    let mut seen = BTreeSet::new();
    let mut states = Vec::with_capacity(decls.len());

    for decl in &decls {
        let name = decl.name.trim();
        if name.is_empty() {
            return Err(Error::config("environment.capabilities[].name is empty"));
        }
        if !seen.insert(name.to_string()) {
            return Err(Error::config(format!("duplicate capability '{name}'")));
        }

        let status = match satisfy(cfg, decl, ctx) {
            Ok(status) => status,
            Err(e) if !decl.required => {
                warn!(capability = name, error = %e, "optional capability unavailable");
                ctx.log(&format!("optional capability '{name}' unavailable: {e}"));
                CapabilityStatus::Missing
            }
            Err(e) => return Err(e),
        };
        info!(capability = name, kind = decl.kind.as_str(), ?status, "capability checked");
        states.push(CapabilityState {
            name: name.to_string(),
            kind: decl.kind,
            package: decl.package_name().to_string(),
            required: decl.required,
            status,
        });
    }

    Ok(BuildEnvironment::from_states(states))
}

fn probe(decl: &CapabilityDecl, ctx: &ExecCtx) -> Result<bool> {
    let spec = CommandSpec::from_argv(&decl.probe_argv())?;
    // A probe that cannot even start means the tool is not there.
    Ok(ctx.run(&spec).map(|o| o.success()).unwrap_or(false))
}

fn satisfy(cfg: &EnvironmentConfig, decl: &CapabilityDecl, ctx: &ExecCtx) -> Result<CapabilityStatus> {
    if probe(decl, ctx)? {
        ctx.log(&format!("{} '{}' present", decl.kind.as_str(), decl.name));
        return Ok(CapabilityStatus::Present);
    }

    let argv = if !decl.install.is_empty() {
        decl.install.clone()
    } else if !cfg.installer.is_empty() {
        let mut argv = cfg.installer.clone();
        argv.push(decl.package_name().to_string());
        argv
    } else {
        return Err(Error::MissingCapability {
            capability: decl.name.clone(),
            detail: "not present and no installer configured".into(),
        });
    };

    let mut spec = CommandSpec::from_argv(&argv)?;
    spec.env
        .insert("DEBIAN_FRONTEND".into(), "noninteractive".into());
    ctx.log(&format!("installing {} '{}'", decl.kind.as_str(), decl.name));
    let out = ctx.run(&spec).map_err(|e| Error::MissingCapability {
        capability: decl.name.clone(),
        detail: e.to_string(),
    })?;
    if !out.success() {
        let last = out.output.lines().last().unwrap_or("no output").to_string();
        return Err(Error::MissingCapability {
            capability: decl.name.clone(),
            detail: format!("`{}` failed: {last}", spec.display()),
        });
    }

    if !probe(decl, ctx)? {
        return Err(Error::MissingCapability {
            capability: decl.name.clone(),
            detail: "still unavailable after install".into(),
        });
    }
    Ok(CapabilityStatus::Installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_toolchain_is_used_when_nothing_is_declared() {
        let cfg = EnvironmentConfig::default();
        let names: Vec<String> = cfg
            .effective_capabilities()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            ["dpkg-deb", "python3", "python3-setuptools", "debhelper", "dh-python"]
        );
    }

    #[test]
    fn plugin_probe_defaults_to_dpkg_query() {
        let decl = CapabilityDecl {
            name: "dh-python".into(),
            kind: CapabilityKind::Plugin,
            ..CapabilityDecl::default()
        };
        assert_eq!(decl.probe_argv(), ["dpkg-query", "-W", "dh-python"]);
    }

    #[test]
    fn ensure_ready_names_the_missing_capability() {
        let env = BuildEnvironment::from_states(vec![CapabilityState {
            name: "dpkg-deb".into(),
            kind: CapabilityKind::Tool,
            package: "dpkg".into(),
            required: true,
            status: CapabilityStatus::Missing,
        }]);
        let err = env.ensure_ready().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingCapability);
        assert!(err.to_string().contains("dpkg-deb"), "unexpected err: {err}");
        assert!(!env.provides("dpkg"));

        let env = BuildEnvironment::preprovisioned(["dpkg-deb", "python3"]);
        assert!(env.ensure_ready().is_ok());
        assert!(env.provides("python3"));
    }
}
