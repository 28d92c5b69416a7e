//! Dependency relation fields (`Depends`, `Build-Depends`, ...).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[a-z0-9][a-z0-9+.\-]+)(?::(?P<archq>[a-z0-9\-]+))?\s*(?:\(\s*(?P<op><<|<=|=|>=|>>)\s*(?P<ver>[^\s)]+)\s*\))?\s*(?P<arches>\[[^\]]*\])?\s*(?P<profiles>(?:<[^>]*>\s*)*)$",
    )
    .expect("valid relation regex")
});
static SUBSTVAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("valid substvar regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub arch_qualifier: Option<String>,
    pub constraint: Option<(String, String)>,
    /// Architecture restriction list and build profiles, kept verbatim.
    pub restrictions: Option<String>,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(q) = &self.arch_qualifier {
            write!(f, ":{q}")?;
        }
        if let Some((op, ver)) = &self.constraint {
            write!(f, " ({op} {ver})")?;
        }
        if let Some(r) = &self.restrictions {
            write!(f, " {r}")?;
        }
        Ok(())
    }
}

/// One comma-separated entry: a set of `|` alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub alternatives: Vec<Relation>,
}

impl Dependency {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.alternatives.iter().map(|r| r.name.as_str())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .alternatives
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        f.write_str(&parts.join(" | "))
    }
}

pub fn render_list(deps: &[Dependency]) -> String {
    deps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Substitution variables known without running the debhelper tool chain.
pub fn default_substvars() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("misc:Depends".to_string(), String::new()),
        ("misc:Pre-Depends".to_string(), String::new()),
        ("shlibs:Depends".to_string(), String::new()),
        ("python3:Depends".to_string(), "python3".to_string()),
    ])
}

/// Replaces `${name}` tokens; an unknown variable is an error.
pub fn expand_substvars(raw: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    let mut unknown = None;
    let out = SUBSTVAR_RE.replace_all(raw, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match vars.get(key) {
            Some(v) => v.clone(),
            None => {
                unknown.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    match unknown {
        Some(key) => Err(format!("unknown substitution variable '${{{key}}}'")),
        None => Ok(out.into_owned()),
    }
}

pub fn parse_relations(raw: &str) -> Result<Vec<Dependency>, String> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut alternatives = Vec::new();
        for alt in entry.split('|') {
            let alt = alt.trim();
            let caps = RELATION_RE
                .captures(alt)
                .ok_or_else(|| format!("malformed relation '{alt}'"))?;
            let restrictions = [caps.name("arches"), caps.name("profiles")]
                .into_iter()
                .flatten()
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>();
            alternatives.push(Relation {
                name: caps["name"].to_string(),
                arch_qualifier: caps.name("archq").map(|m| m.as_str().to_string()),
                constraint: caps
                    .name("op")
                    .zip(caps.name("ver"))
                    .map(|(op, v)| (op.as_str().to_string(), v.as_str().to_string())),
                restrictions: (!restrictions.is_empty()).then(|| restrictions.join(" ")),
            });
        }
        out.push(Dependency { alternatives });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_constraints_alternatives_and_qualifiers() {
        let deps = parse_relations(
            "python3 (>= 3.8), python3-requests | python3-urllib3, libc6:any, dh-python [amd64] <!nocheck>",
        )
        .expect("parse");
        assert_eq!(deps.len(), 4);
        assert_eq!(
            deps[0].alternatives[0].constraint,
            Some((">=".to_string(), "3.8".to_string()))
        );
        assert_eq!(
            deps[1].names().collect::<Vec<_>>(),
            vec!["python3-requests", "python3-urllib3"]
        );
        assert_eq!(deps[2].alternatives[0].arch_qualifier.as_deref(), Some("any"));
        assert_eq!(
            deps[3].alternatives[0].restrictions.as_deref(),
            Some("[amd64] <!nocheck>")
        );
        assert_eq!(
            render_list(&deps[..2]),
            "python3 (>= 3.8), python3-requests | python3-urllib3"
        );
    }

    #[test]
    fn rejects_malformed_relations() {
        for bad in ["python3 (>= )", "Python3", "pkg (~ 1.0)", "a |"] {
            assert!(parse_relations(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn substvars_expand_and_unknown_ones_fail() {
        let vars = default_substvars();
        let out = expand_substvars("${python3:Depends}, ${misc:Depends}, curl", &vars).expect("expand");
        let deps = parse_relations(&out).expect("parse");
        assert_eq!(render_list(&deps), "python3, curl");

        let err = expand_substvars("${foo:Depends}", &vars).unwrap_err();
        assert!(err.contains("foo:Depends"), "unexpected err: {err}");
    }
}
