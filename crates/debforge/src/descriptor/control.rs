//! deb822 paragraph parsing for `debian/control`.

/// One paragraph of `Field: value` pairs, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<(String, String)>,
}

impl Paragraph {
    /// Raw value; continuation lines are kept, separated by `\n`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value with continuation lines joined by single spaces, for folded
    /// fields such as `Depends`.
    pub fn folded(&self, name: &str) -> Option<String> {
        let v = self.get(name)?;
        let joined = v
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Some(joined)
    }

    /// Single-line value, `None` when absent or blank.
    pub fn simple(&self, name: &str) -> Option<String> {
        self.folded(name).filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, name: String, value: String, line_no: usize) -> Result<(), String> {
        if self.get(&name).is_some() {
            return Err(format!("line {line_no}: duplicate field '{name}'"));
        }
        self.fields.push((name, value));
        Ok(())
    }
}

/// Parses deb822 text. Errors carry the offending line number.
pub fn parse_paragraphs(raw: &str) -> Result<Vec<Paragraph>, String> {
    let mut out = Vec::new();
    let mut cur = Paragraph::default();
    let mut open: Option<(String, String)> = None;

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        if line.starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if let Some((k, v)) = open.take() {
                cur.push(k, v, line_no)?;
            }
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some((_, v)) = open.as_mut() else {
                return Err(format!(
                    "line {line_no}: continuation line without a field"
                ));
            };
            v.push('\n');
            v.push_str(line.trim_end());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(format!("line {line_no}: expected 'Field: value'"));
        };
        let name = name.trim_end();
        if name.is_empty() || name.contains(char::is_whitespace) || name.starts_with('-') {
            return Err(format!("line {line_no}: invalid field name '{name}'"));
        }
        if let Some((k, v)) = open.take() {
            cur.push(k, v, line_no)?;
        }
        open = Some((name.to_string(), value.trim().to_string()));
    }

    if let Some((k, v)) = open.take() {
        cur.push(k, v, raw.lines().count())?;
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    Ok(out)
}
