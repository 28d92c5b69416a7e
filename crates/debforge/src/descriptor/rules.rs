//! Build rule selection from `debian/rules`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

static DH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\t+dh\s+\$@(?P<args>.*)$").expect("valid dh regex"));
static BUILDSYSTEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--buildsystem[= ](?P<bs>[A-Za-z0-9_+\-]+)").expect("valid buildsystem regex")
});
static WITH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--with[= ](?P<addons>\S+)").expect("valid with regex"));

/// How the staged source is turned into an installable tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildRule {
    Pybuild,
    PythonDistutils,
    Makefile,
}

impl BuildRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildRule::Pybuild => "pybuild",
            BuildRule::PythonDistutils => "python_distutils",
            BuildRule::Makefile => "makefile",
        }
    }

    pub fn default_build_command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            BuildRule::Pybuild => &["pybuild", "--build", "--dir", "{source}"],
            BuildRule::PythonDistutils => &["python3", "setup.py", "build"],
            BuildRule::Makefile => &["make"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }

    /// Paths (relative to the staged source) the build must leave behind.
    pub fn default_outputs(&self) -> Vec<String> {
        match self {
            BuildRule::Pybuild => vec![".pybuild".into()],
            BuildRule::PythonDistutils => vec!["build".into()],
            BuildRule::Makefile => Vec::new(),
        }
    }

    pub fn default_install_command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            BuildRule::Pybuild => &[
                "pybuild",
                "--install",
                "--dir",
                "{source}",
                "--dest-dir",
                "{package_root}",
            ],
            BuildRule::PythonDistutils => &[
                "python3",
                "setup.py",
                "install",
                "--root",
                "{package_root}",
                "--prefix",
                "/usr",
                "--install-layout",
                "deb",
            ],
            BuildRule::Makefile => &["make", "install", "DESTDIR={package_root}"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for BuildRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pybuild" => Ok(BuildRule::Pybuild),
            "python_distutils" => Ok(BuildRule::PythonDistutils),
            "makefile" => Ok(BuildRule::Makefile),
            other => Err(format!(
                "unrecognized build rule '{other}' (supported: pybuild, python_distutils, makefile)"
            )),
        }
    }
}

/// Picks the build rule named by the `dh $@` invocation in a rules file.
pub fn detect(rules: &str) -> Result<BuildRule, String> {
    let caps = DH_RE
        .captures(rules)
        .ok_or_else(|| "rules file has no 'dh $@' invocation".to_string())?;
    let args = &caps["args"];

    if let Some(bs) = BUILDSYSTEM_RE.captures(args) {
        return bs["bs"].parse();
    }
    let python = WITH_RE
        .captures_iter(args)
        .flat_map(|c| {
            c["addons"]
                .split(',')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .any(|a| a == "python3");
    Ok(if python {
        BuildRule::Pybuild
    } else {
        BuildRule::Makefile
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_buildsystem_wins() {
        let rules = "#!/usr/bin/make -f\n%:\n\tdh $@ --with python3 --buildsystem=pybuild\n";
        assert_eq!(detect(rules), Ok(BuildRule::Pybuild));

        let rules = "%:\n\tdh $@ --buildsystem python_distutils\n";
        assert_eq!(detect(rules), Ok(BuildRule::PythonDistutils));
    }

    #[test]
    fn python_addon_implies_pybuild_and_plain_dh_is_makefile() {
        assert_eq!(detect("%:\n\tdh $@ --with=python3,bash-completion\n"), Ok(BuildRule::Pybuild));
        assert_eq!(detect("%:\n\tdh $@\n"), Ok(BuildRule::Makefile));
    }

    #[test]
    fn unknown_buildsystem_and_missing_dh_are_rejected() {
        let err = detect("%:\n\tdh $@ --buildsystem=cmake\n").unwrap_err();
        assert!(err.contains("cmake"), "unexpected err: {err}");
        assert!(detect("build:\n\tpython3 setup.py build\n").is_err());
    }
}
