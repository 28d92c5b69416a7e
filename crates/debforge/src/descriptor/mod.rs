//! The packaging descriptor: the `debian/` directory of the staged source.
//!
//! Reading it is split in two: [`read_descriptor`] performs the checks the
//! configure phase owns (anything that makes the build itself impossible), and
//! [`PackageSpec::validate_for_packaging`] performs the checks the target
//! archive format imposes, which only the package phase reports.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

pub mod changelog;
pub mod control;
pub mod relations;
pub mod rules;
pub mod version;

pub use changelog::ChangelogEntry;
pub use relations::Dependency;
pub use rules::BuildRule;
pub use version::DebVersion;

/// Reproducible timestamp used when the changelog carries no date.
pub const FALLBACK_SOURCE_DATE_EPOCH: i64 = 315_532_800;

pub const MAINTAINER_SCRIPTS: [&str; 4] = ["preinst", "postinst", "prerm", "postrm"];

static PACKAGE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.\-]+$").expect("valid package name regex"));
static ARCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*$").expect("valid architecture regex"));

/// Everything the phases after configure need to know about the package.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub name: String,
    pub source: String,
    pub version: DebVersion,
    pub architecture: String,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
    pub homepage: Option<String>,
    pub build_depends: Vec<Dependency>,
    /// Unexpanded runtime relation fields, checked at package time.
    pub runtime_fields: BTreeMap<&'static str, String>,
    pub build_rule: BuildRule,
    pub changelog: ChangelogEntry,
    pub descriptor_dir: PathBuf,
}

const RUNTIME_FIELDS: [&str; 6] = [
    "Pre-Depends",
    "Depends",
    "Recommends",
    "Suggests",
    "Conflicts",
    "Provides",
];

fn read_required(dir: &Path, file: &str) -> Result<String> {
    let path = dir.join(file);
    if !path.is_file() {
        return Err(Error::descriptor(format!(
            "descriptor file {} is missing",
            path.display()
        )));
    }
    fs::read_to_string(&path).map_err(|e| {
        Error::descriptor(format!("failed to read {}: {e}", path.display()))
    })
}

/// Reads `control`, `changelog` and `rules` from `dir`. Every failure here is
/// a [`Error::Descriptor`].
pub fn read_descriptor(dir: &Path, rule_override: Option<BuildRule>) -> Result<PackageSpec> {
    let control_raw = read_required(dir, "control")?;
    let paragraphs = control::parse_paragraphs(&control_raw)
        .map_err(|e| Error::descriptor(format!("debian/control: {e}")))?;
    let Some(source_para) = paragraphs.first() else {
        return Err(Error::descriptor("debian/control has no paragraphs"));
    };
    let binary_para = paragraphs.get(1).unwrap_or(source_para);

    let source = source_para
        .simple("Source")
        .or_else(|| binary_para.simple("Package"))
        .ok_or_else(|| Error::descriptor("debian/control declares neither Source nor Package"))?;
    let name = binary_para.simple("Package").unwrap_or_else(|| source.clone());
    for n in [&source, &name] {
        if !PACKAGE_NAME_RE.is_match(n) {
            return Err(Error::descriptor(format!(
                "debian/control: invalid package name '{n}'"
            )));
        }
    }

    let changelog_raw = read_required(dir, "changelog")?;
    let changelog = changelog::parse_top_entry(&changelog_raw)
        .map_err(|e| Error::descriptor(format!("debian/{e}")))?;

    let build_rule = match rule_override {
        Some(rule) => rule,
        None => {
            let rules_raw = read_required(dir, "rules")?;
            rules::detect(&rules_raw).map_err(|e| Error::descriptor(format!("debian/rules: {e}")))?
        }
    };

    let build_depends = ["Build-Depends", "Build-Depends-Indep"]
        .iter()
        .filter_map(|f| source_para.folded(f))
        .map(|raw| relations::parse_relations(&raw))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::descriptor(format!("debian/control Build-Depends: {e}")))?
        .into_iter()
        .flatten()
        .collect();

    let runtime_fields = RUNTIME_FIELDS
        .iter()
        .filter_map(|f| binary_para.folded(f).map(|v| (*f, v)))
        .filter(|(_, v)| !v.is_empty())
        .collect();

    Ok(PackageSpec {
        name,
        version: changelog.version.clone(),
        architecture: binary_para
            .simple("Architecture")
            .unwrap_or_else(|| "all".into()),
        maintainer: source_para
            .simple("Maintainer")
            .or_else(|| binary_para.simple("Maintainer")),
        description: binary_para
            .get("Description")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned),
        section: binary_para
            .simple("Section")
            .or_else(|| source_para.simple("Section")),
        priority: binary_para
            .simple("Priority")
            .or_else(|| source_para.simple("Priority")),
        homepage: source_para
            .simple("Homepage")
            .or_else(|| binary_para.simple("Homepage")),
        source,
        build_depends,
        runtime_fields,
        build_rule,
        changelog,
        descriptor_dir: dir.to_path_buf(),
    })
}

/// Runtime metadata that passed the archive-format checks.
#[derive(Debug, Clone)]
pub struct ValidatedMetadata {
    pub maintainer: String,
    pub description: String,
    pub relations: Vec<(&'static str, Vec<Dependency>)>,
}

impl PackageSpec {
    /// `<name>_<version>_<arch>.deb`, epoch dropped.
    pub fn archive_file_name(&self) -> String {
        format!(
            "{}_{}_{}.deb",
            self.name,
            self.version.without_epoch(),
            self.architecture
        )
    }

    pub fn source_date_epoch(&self) -> i64 {
        self.changelog
            .date
            .map(|d| d.timestamp())
            .filter(|t| *t >= 0)
            .unwrap_or(FALLBACK_SOURCE_DATE_EPOCH)
    }

    /// Checks required by the archive format. Every failure here is an
    /// [`Error::Packaging`].
    pub fn validate_for_packaging(&self) -> Result<ValidatedMetadata> {
        let maintainer = self
            .maintainer
            .clone()
            .ok_or_else(|| Error::packaging("debian/control is missing the Maintainer field"))?;
        let description = self
            .description
            .clone()
            .ok_or_else(|| Error::packaging("debian/control is missing the Description field"))?;
        if self.changelog.maintainer.is_none() || self.changelog.date.is_none() {
            return Err(Error::packaging(
                "debian/changelog top entry has no valid ' -- Name <email>  date' trailer",
            ));
        }
        if self.changelog.package != self.source {
            return Err(Error::packaging(format!(
                "debian/changelog names package '{}' but debian/control Source is '{}'",
                self.changelog.package, self.source
            )));
        }
        if self.architecture == "any" || !ARCH_RE.is_match(&self.architecture) {
            return Err(Error::packaging(format!(
                "architecture '{}' cannot be used for a binary archive",
                self.architecture
            )));
        }

        let substvars = relations::default_substvars();
        let mut parsed = Vec::new();
        for (field, raw) in &self.runtime_fields {
            let expanded = relations::expand_substvars(raw, &substvars)
                .map_err(|e| Error::packaging(format!("debian/control {field}: {e}")))?;
            let deps = relations::parse_relations(&expanded)
                .map_err(|e| Error::packaging(format!("debian/control {field}: {e}")))?;
            if matches!(*field, "Depends" | "Pre-Depends")
                && deps.iter().any(|d| d.names().any(|n| n == self.name))
            {
                return Err(Error::packaging(format!(
                    "debian/control {field}: package '{}' depends on itself",
                    self.name
                )));
            }
            if !deps.is_empty() {
                parsed.push((*field, deps));
            }
        }
        parsed.sort_by_key(|(f, _)| RUNTIME_FIELDS.iter().position(|x| x == f));

        Ok(ValidatedMetadata {
            maintainer,
            description,
            relations: parsed,
        })
    }

    /// Binary `DEBIAN/control` content.
    pub fn render_control(&self, meta: &ValidatedMetadata, installed_size_kib: u64) -> String {
        let mut out = String::new();
        out.push_str(&format!("Package: {}\n", self.name));
        if self.source != self.name {
            out.push_str(&format!("Source: {}\n", self.source));
        }
        out.push_str(&format!("Version: {}\n", self.version));
        out.push_str(&format!("Architecture: {}\n", self.architecture));
        out.push_str(&format!("Maintainer: {}\n", meta.maintainer));
        out.push_str(&format!("Installed-Size: {installed_size_kib}\n"));
        for (field, deps) in &meta.relations {
            out.push_str(&format!("{field}: {}\n", relations::render_list(deps)));
        }
        if let Some(s) = &self.section {
            out.push_str(&format!("Section: {s}\n"));
        }
        if let Some(p) = &self.priority {
            out.push_str(&format!("Priority: {p}\n"));
        }
        if let Some(h) = &self.homepage {
            out.push_str(&format!("Homepage: {h}\n"));
        }
        out.push_str(&format!("Description: {}\n", meta.description));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROL: &str = "\
Source: wordfence
Section: utils
Priority: optional
Maintainer: Wordfence <opensource@wordfence.com>
Build-Depends: debhelper-compat (= 13), dh-python, python3-all, python3-setuptools

Package: wordfence
Architecture: all
Depends: ${python3:Depends}, ${misc:Depends}, python3-requests (>= 2.3)
Description: Wordfence malware scanner
 Command line malware scanner.
";

    const CHANGELOG: &str = "\
wordfence (1.2.0) stable; urgency=medium

  * Release.

 -- Wordfence <opensource@wordfence.com>  Tue, 05 Mar 2024 12:00:00 +0000
";

    const RULES: &str = "#!/usr/bin/make -f\n%:\n\tdh $@ --with python3 --buildsystem=pybuild\n";

    fn write_descriptor(dir: &Path, control: &str, changelog: &str, rules: &str) {
        fs::create_dir_all(dir).expect("mkdir");
        fs::write(dir.join("control"), control).expect("control");
        fs::write(dir.join("changelog"), changelog).expect("changelog");
        fs::write(dir.join("rules"), rules).expect("rules");
    }

    #[test]
    fn reads_complete_descriptor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_descriptor(tmp.path(), CONTROL, CHANGELOG, RULES);

        let spec = read_descriptor(tmp.path(), None).expect("read");
        assert_eq!(spec.name, "wordfence");
        assert_eq!(spec.version.to_string(), "1.2.0");
        assert_eq!(spec.build_rule, BuildRule::Pybuild);
        assert_eq!(spec.build_depends.len(), 4);
        assert_eq!(spec.archive_file_name(), "wordfence_1.2.0_all.deb");
        assert_eq!(spec.source_date_epoch(), 1_709_640_000);

        let meta = spec.validate_for_packaging().expect("validate");
        let control = spec.render_control(&meta, 12);
        assert!(control.contains("Version: 1.2.0\n"), "{control}");
        assert!(
            control.contains("Depends: python3, python3-requests (>= 2.3)\n"),
            "{control}"
        );
        assert!(control.contains("Installed-Size: 12\n"), "{control}");
        assert!(control.ends_with(" Command line malware scanner.\n"), "{control}");
    }

    #[test]
    fn missing_changelog_is_a_descriptor_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_descriptor(tmp.path(), CONTROL, CHANGELOG, RULES);
        fs::remove_file(tmp.path().join("changelog")).expect("rm");

        let err = read_descriptor(tmp.path(), None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DescriptorError);
    }

    #[test]
    fn rule_override_skips_rules_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_descriptor(tmp.path(), CONTROL, CHANGELOG, RULES);
        fs::remove_file(tmp.path().join("rules")).expect("rm");

        let spec = read_descriptor(tmp.path(), Some(BuildRule::Makefile)).expect("read");
        assert_eq!(spec.build_rule, BuildRule::Makefile);
    }

    #[test]
    fn packaging_checks_report_packaging_failures() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let control = CONTROL.replace("Maintainer: Wordfence <opensource@wordfence.com>\n", "");
        write_descriptor(tmp.path(), &control, CHANGELOG, RULES);

        let spec = read_descriptor(tmp.path(), None).expect("configure-level read succeeds");
        let err = spec.validate_for_packaging().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PackagingFailure);
        assert!(err.to_string().contains("Maintainer"), "unexpected err: {err}");
    }

    #[test]
    fn self_dependency_is_rejected_at_package_time() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let control = CONTROL.replace("python3-requests (>= 2.3)", "wordfence");
        write_descriptor(tmp.path(), &control, CHANGELOG, RULES);

        let spec = read_descriptor(tmp.path(), None).expect("read");
        let err = spec.validate_for_packaging().unwrap_err();
        assert!(err.to_string().contains("itself"), "unexpected err: {err}");
    }
}
