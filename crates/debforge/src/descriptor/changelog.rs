//! Top entry of `debian/changelog`.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use super::version::DebVersion;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<pkg>[a-z0-9][a-z0-9+.\-]+) \((?P<ver>[^ ()]+)\) (?P<dist>[^;]+);(?P<rest>.*)$")
        .expect("valid changelog header regex")
});
static TRAILER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ -- (?P<who>\S.*?)  (?P<date>\S.*)$").expect("valid changelog trailer regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub package: String,
    pub version: DebVersion,
    pub distribution: String,
    pub urgency: Option<String>,
    /// `Name <email>` from the ` -- ` trailer line.
    pub maintainer: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
}

/// Parses the newest entry. Only the header is mandatory here; a missing or
/// malformed trailer leaves `maintainer`/`date` empty.
pub fn parse_top_entry(raw: &str) -> Result<ChangelogEntry, String> {
    let mut lines = raw
        .lines()
        .enumerate()
        .skip_while(|(_, l)| l.trim().is_empty());

    let Some((idx, header)) = lines.next() else {
        return Err("changelog is empty".into());
    };
    let caps = HEADER_RE.captures(header).ok_or_else(|| {
        format!(
            "changelog line {}: expected 'package (version) distribution; urgency=...'",
            idx + 1
        )
    })?;
    let version = DebVersion::parse(&caps["ver"]).map_err(|e| format!("changelog: {e}"))?;
    let urgency = caps["rest"]
        .split(',')
        .filter_map(|kv| kv.trim().strip_prefix("urgency="))
        .map(|u| u.trim().to_string())
        .next();

    let mut entry = ChangelogEntry {
        package: caps["pkg"].to_string(),
        version,
        distribution: caps["dist"].trim().to_string(),
        urgency,
        maintainer: None,
        date: None,
    };

    for (_, line) in lines {
        if HEADER_RE.is_match(line) {
            break;
        }
        if let Some(t) = TRAILER_RE.captures(line) {
            entry.maintainer = Some(t["who"].trim().to_string());
            entry.date = DateTime::parse_from_rfc2822(t["date"].trim()).ok();
            break;
        }
    }
    Ok(entry)
}
