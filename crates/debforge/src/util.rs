use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p).map_err(|e| Error::io_at("create dir", p, e))
}

pub fn write_text(p: &Path, s: &str) -> Result<()> {
    if let Some(parent) = p.parent() {
        ensure_dir(parent)?;
    }
    fs::write(p, s).map_err(|e| Error::io_at("write", p, e))
}

pub fn remove_path(p: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(p) else {
        return Ok(());
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(p)
    } else {
        fs::remove_file(p)
    };
    res.map_err(|e| Error::io_at("remove", p, e))
}

pub fn dir_is_empty(p: &Path) -> Result<bool> {
    let mut it = fs::read_dir(p).map_err(|e| Error::io_at("read dir", p, e))?;
    Ok(it.next().is_none())
}

pub fn validate_rel_path(p: &str) -> Result<()> {
    let path = p.trim();
    if path.is_empty() {
        return Err(Error::config("path is empty"));
    }
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
    {
        return Err(Error::config(format!(
            "path '{path}' must be relative and must not contain '..'"
        )));
    }
    Ok(())
}

/// Copies a directory tree, skipping top-level entries named in `exclude`
/// and the `skip` paths (relative to `src`) at any depth.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[String], skip: &[PathBuf]) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::msg(format!(
            "source is not a directory: {}",
            src.display()
        )));
    }

    ensure_dir(dst)?;
    let walker = walkdir::WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let rel = e.path().strip_prefix(src).unwrap_or(e.path());
            if e.depth() > 0 && skip.iter().any(|s| rel.starts_with(s)) {
                return false;
            }
            e.depth() != 1
                || !exclude
                    .iter()
                    .any(|x| e.file_name().to_str() == Some(x.as_str()))
        });
    for entry in walker {
        let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&out)?;
        } else if entry.file_type().is_symlink() {
            copy_symlink(entry.path(), &out)?;
        } else {
            fs::copy(entry.path(), &out).map_err(|e| {
                Error::msg(format!(
                    "failed to copy {} -> {}: {e}",
                    entry.path().display(),
                    out.display()
                ))
            })?;
        }
    }
    Ok(())
}

/// Canonical form of `p`. Missing trailing components are resolved against
/// the longest existing ancestor.
pub fn canonical_lossy(p: &Path) -> PathBuf {
    let mut existing = p;
    let mut missing = Vec::new();
    loop {
        if let Ok(found) = existing.canonicalize() {
            return missing.iter().rev().fold(found, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return p.to_path_buf(),
        }
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    use std::os::unix::fs as unix_fs;

    let target = fs::read_link(src).map_err(|e| Error::io_at("read symlink", src, e))?;
    unix_fs::symlink(&target, dst).map_err(|e| Error::io_at("create symlink", dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| Error::io_at("copy", src, e))
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io_at("set mode on", path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut f = fs::File::open(path).map_err(|e| Error::io_at("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf).map_err(|e| Error::io_at("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Expands `{key}` placeholders. Unknown placeholders are rejected so a typo
/// in a command template never reaches the shell.
pub fn expand_template(raw: &str, vars: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let key = &after[..end];
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            // Not a placeholder (e.g. a shell `${VAR}` or brace expansion).
            out.push('{');
            rest = after;
            continue;
        }
        let Some(v) = vars.get(key) else {
            let known = vars.keys().copied().collect::<Vec<_>>().join(", ");
            return Err(Error::config(format!(
                "unknown placeholder '{{{key}}}' in '{raw}' (known: {known})"
            )));
        };
        out.push_str(v);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_template_substitutes_known_keys() {
        let mut vars = BTreeMap::new();
        vars.insert("name", "wordfence".to_string());
        vars.insert("version", "1.2.0".to_string());
        assert_eq!(
            expand_template("{name}_{version}.deb", &vars).expect("expand"),
            "wordfence_1.2.0.deb"
        );
    }

    #[test]
    fn expand_template_rejects_unknown_keys_and_keeps_shell_braces() {
        let vars = BTreeMap::from([("name", "x".to_string())]);
        let err = expand_template("{nmae}", &vars).unwrap_err();
        assert!(err.to_string().contains("nmae"), "unexpected err: {err}");

        assert_eq!(
            expand_template("echo ${HOME} {A,B}", &vars).expect("expand"),
            "echo ${HOME} {A,B}"
        );
    }

    #[test]
    fn copy_tree_skips_excluded_top_level_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join(".git")).expect("mkdir .git");
        fs::create_dir_all(src.join("pkg/.git")).expect("mkdir nested .git");
        fs::write(src.join(".git/HEAD"), "ref").expect("write HEAD");
        fs::write(src.join("setup.py"), "").expect("write setup.py");

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst, &[".git".to_string()], &[]).expect("copy");
        assert!(dst.join("setup.py").is_file());
        assert!(!dst.join(".git").exists());
        assert!(dst.join("pkg/.git").is_dir(), "only top-level entries are excluded");
    }

    #[test]
    fn copy_tree_skips_nested_paths_including_its_own_destination() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path();
        fs::create_dir_all(src.join(".cache/keep")).expect("mkdir");
        fs::write(src.join(".cache/keep/a"), "a").expect("write");
        fs::write(src.join("setup.py"), "").expect("write setup.py");

        let dst = src.join(".cache/debforge/staging/source");
        copy_tree(src, &dst, &[], &[PathBuf::from(".cache/debforge")]).expect("copy");
        assert!(dst.join("setup.py").is_file());
        assert!(dst.join(".cache/keep/a").is_file());
        assert!(!dst.join(".cache/debforge").exists());
    }

    #[test]
    fn canonical_lossy_keeps_missing_components() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = tmp.path().canonicalize().expect("canonical");
        assert_eq!(
            canonical_lossy(&tmp.path().join("not/yet/here")),
            base.join("not/yet/here")
        );
    }

    #[test]
    fn rel_paths_must_stay_inside() {
        assert!(validate_rel_path("debian").is_ok());
        assert!(validate_rel_path("../debian").is_err());
        assert!(validate_rel_path("/debian").is_err());
    }
}
