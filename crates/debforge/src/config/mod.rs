use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "debforge.toml";

/// A loaded build definition. Components read their own tables out of it.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            value: Value::Table(Default::default()),
        }
    }

    pub fn from_toml_str(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let value: Value = toml::from_str(raw)
            .map_err(|e| Error::config(format!("TOML parse error: {e}")))?;
        Ok(Self {
            path: path.into(),
            value,
        })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_table()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid [{path}] in build definition: {e}")))?;
        Ok(Some(parsed))
    }

    /// Directory relative paths in the definition are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn load_value(path: &Path, chain: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !chain.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "build definition extends cycle at {}",
            canonical.display()
        )));
    }

    let raw = fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read build definition {}: {e}",
            path.display()
        ))
    })?;
    let mut value: Value = toml::from_str(&raw)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    let parent = value
        .as_table_mut()
        .and_then(|t| t.remove("extends"))
        .map(|v| match v {
            Value::String(s) => Ok(s),
            _ => Err(Error::config(format!(
                "'extends' in {} must be a string",
                path.display()
            ))),
        })
        .transpose()?;
    if let Some(parent) = parent {
        let parent_path = PathBuf::from(parent.trim());
        let parent_path = if parent_path.is_absolute() {
            parent_path
        } else {
            path.parent().unwrap_or(Path::new(".")).join(parent_path)
        };
        out = load_value(&parent_path, chain)?;
    }
    merge(&mut out, value);

    chain.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let value = load_value(path, &mut HashSet::new())?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Loads `path` if given; otherwise the default definition when present, or
/// an empty one so the tool can run without any arguments.
pub fn load_or_default(path: Option<&Path>) -> Result<ConfigDoc> {
    match path {
        Some(p) => load(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                load(default)
            } else {
                Ok(ConfigDoc::empty(default))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_merges_tables_with_child_winning() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("base.toml"),
            "[workspace]\nbuild_dir = \"b\"\nout_dir = \"o\"\n",
        )
        .expect("write base");
        fs::write(
            tmp.path().join("child.toml"),
            "extends = \"base.toml\"\n[workspace]\nout_dir = \"dist\"\n",
        )
        .expect("write child");

        let doc = load(&tmp.path().join("child.toml")).expect("load");
        assert_eq!(
            doc.value_path("workspace.build_dir").and_then(Value::as_str),
            Some("b")
        );
        assert_eq!(
            doc.value_path("workspace.out_dir").and_then(Value::as_str),
            Some("dist")
        );
        assert!(doc.value_path("extends").is_none());
    }

    #[test]
    fn extends_cycle_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.toml"), "extends = \"b.toml\"\n").expect("write a");
        fs::write(tmp.path().join("b.toml"), "extends = \"a.toml\"\n").expect("write b");

        let err = load(&tmp.path().join("a.toml")).unwrap_err();
        assert!(err.to_string().contains("cycle"), "unexpected err: {err}");
    }

    #[test]
    fn base_dir_follows_definition_path() {
        let doc = ConfigDoc::empty("/srv/pkgs/wordfence.toml");
        assert_eq!(doc.base_dir(), PathBuf::from("/srv/pkgs"));
        assert_eq!(ConfigDoc::empty("debforge.toml").base_dir(), PathBuf::from("."));
    }
}
