use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static UPSTREAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9][A-Za-z0-9.+~-]*$").expect("valid upstream regex")
});
static REVISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.+~]+$").expect("valid revision regex")
});

/// A Debian package version: `[epoch:]upstream[-revision]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebVersion {
    pub epoch: Option<u32>,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("version is empty".into());
        }

        let (epoch, rest) = match raw.split_once(':') {
            Some((e, rest)) => {
                let epoch = e
                    .parse::<u32>()
                    .map_err(|_| format!("invalid epoch '{e}' in version '{raw}'"))?;
                (Some(epoch), rest)
            }
            None => (None, raw),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u, Some(r)),
            None => (rest, None),
        };
        if !UPSTREAM_RE.is_match(upstream) {
            return Err(format!("invalid upstream version '{upstream}' in '{raw}'"));
        }
        if let Some(r) = revision
            && !REVISION_RE.is_match(r)
        {
            return Err(format!("invalid debian revision '{r}' in '{raw}'"));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.map(ToOwned::to_owned),
        })
    }

    /// Version as it appears in archive file names (epoch dropped).
    pub fn without_epoch(&self) -> String {
        match &self.revision {
            Some(r) => format!("{}-{r}", self.upstream),
            None => self.upstream.clone(),
        }
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(e) = self.epoch {
            write!(f, "{e}:")?;
        }
        f.write_str(&self.without_epoch())
    }
}
