//! Environment variables and aliases kept as sourced shell snippets

use anyhow::{Context, Result, bail};
use declarative::{Backend, Format, ResourceDeclaration, ResourceKind, ResourceValue};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

const HEADER: &str = "# Managed by converge. Changes are overwritten on the next apply.\n";

pub const ENV_FILE: &str = "env.sh";
pub const ALIAS_FILE: &str = "aliases.sh";

/// One shell file holding every entry of one kind, sorted by name
#[derive(Debug, Clone)]
pub struct ShellSnippet {
    path: PathBuf,
    kind: ResourceKind,
    lock: Arc<Mutex<()>>,
}

impl ShellSnippet {
    /// `export NAME='value'` lines
    pub fn env(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ResourceKind::EnvVar)
    }

    /// `alias name='command'` lines
    pub fn aliases(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ResourceKind::Alias)
    }

    fn new(path: impl Into<PathBuf>, kind: ResourceKind) -> Self {
        Self {
            path: path.into(),
            kind,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn keyword(&self) -> &'static str {
        match self.kind {
            ResourceKind::Alias => "alias",
            _ => "export",
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        parse(&content, self.keyword())
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        fs::write(&self.path, render(entries, self.keyword()))
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.read()?;
        f(&mut entries);
        self.write(&entries)
    }

    fn name_format(&self) -> Format {
        match self.kind {
            ResourceKind::Alias => Format::AliasName,
            _ => Format::VariableName,
        }
    }

    fn value(&self, text: String) -> ResourceValue {
        match self.kind {
            ResourceKind::Alias => ResourceValue::Alias { command: text },
            _ => ResourceValue::EnvVar { value: text },
        }
    }
}

/// Quote a value so it stays on one line
///
/// Plain values are single-quoted for POSIX shells. Values holding control
/// characters use `$'...'` escapes, which bash and zsh understand.
fn quote(value: &str) -> String {
    if !value.chars().any(char::is_control) {
        return format!("'{}'", value.replace('\'', r"'\''"));
    }
    let mut out = String::from("$'");
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '\'' => out.push_str(r"\'"),
            '\n' => out.push_str(r"\n"),
            '\t' => out.push_str(r"\t"),
            '\r' => out.push_str(r"\r"),
            c if c.is_control() && c.is_ascii() => {
                out.push_str(&format!(r"\x{:02x}", c as u32));
            }
            c if c.is_control() => out.push_str(&format!(r"\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Decode a `$'...'` body up to its closing quote, returning the bytes consumed
fn unescape(body: &str, raw: &str) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => return Ok((out, i + 1)),
            '\\' => match chars.next().map(|(_, e)| e) {
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(kind @ ('x' | 'u')) => {
                    let width = if kind == 'x' { 2 } else { 4 };
                    let digits: String = chars.by_ref().take(width).map(|(_, d)| d).collect();
                    let decoded = u32::from_str_radix(&digits, 16)
                        .ok()
                        .filter(|_| digits.len() == width)
                        .and_then(char::from_u32);
                    match decoded {
                        Some(d) => out.push(d),
                        None => bail!("bad escape \\{kind}{digits} in {raw}"),
                    }
                }
                other => bail!("bad escape {other:?} in {raw}"),
            },
            c => out.push(c),
        }
    }
    bail!("unterminated quote in {raw}")
}

fn unquote(raw: &str) -> Result<String> {
    let mut out = String::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("$'") {
            let (text, used) = unescape(tail, raw)?;
            out.push_str(&text);
            rest = &tail[used..];
        } else if let Some(tail) = rest.strip_prefix(r"\'") {
            out.push('\'');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('\'') {
            let Some(end) = tail.find('\'') else {
                bail!("unterminated quote in {raw}");
            };
            out.push_str(&tail[..end]);
            rest = &tail[end + 1..];
        } else {
            bail!("unquoted text in {raw}");
        }
    }
    Ok(out)
}

fn parse(content: &str, keyword: &str) -> Result<BTreeMap<String, String>> {
    let prefix = format!("{keyword} ");
    let mut entries = BTreeMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = line
            .strip_prefix(&prefix)
            .and_then(|rest| rest.split_once('='))
            .map(|(name, raw)| Ok::<_, anyhow::Error>((name.to_string(), unquote(raw)?)));
        match parsed {
            Some(entry) => {
                let (name, value) = entry.with_context(|| format!("line {}", number + 1))?;
                entries.insert(name, value);
            }
            None => bail!("line {}: expected `{keyword} NAME='...'`", number + 1),
        }
    }
    Ok(entries)
}

fn render(entries: &BTreeMap<String, String>, keyword: &str) -> String {
    let mut out = String::from(HEADER);
    for (name, value) in entries {
        out.push_str(&format!("{keyword} {name}={}\n", quote(value)));
    }
    out
}

impl Backend for ShellSnippet {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        let _guard = self.guard();
        Ok(self.read()?.remove(name).map(|text| self.value(text)))
    }

    fn list(&self) -> Result<Vec<String>> {
        let _guard = self.guard();
        Ok(self.read()?.into_keys().collect())
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        let text = match &declaration.value {
            ResourceValue::EnvVar { value } if self.kind == ResourceKind::EnvVar => value,
            ResourceValue::Alias { command } if self.kind == ResourceKind::Alias => command,
            _ => bail!("{} does not belong in {}", declaration.id, self.path.display()),
        };
        let name = &declaration.id.name;
        if !self.name_format().accepts(name) {
            bail!("{name:?} is not {}", self.name_format().describe());
        }
        self.update(|entries| {
            entries.insert(declaration.id.name.clone(), text.clone());
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_var(name: &str, value: &str) -> ResourceDeclaration {
        ResourceDeclaration::new(name, ResourceValue::EnvVar { value: value.into() }, "test")
    }

    #[test]
    fn test_quote_round_trip_with_single_quote() {
        let quoted = quote("it's");
        assert_eq!(quoted, r"'it'\''s'");
        assert_eq!(unquote(&quoted).unwrap(), "it's");
    }

    #[test]
    fn test_control_characters_stay_on_one_line() {
        let value = "line one\nit's \\ two\ttab\u{1b}";
        let quoted = quote(value);
        assert!(!quoted.contains('\n'));
        assert_eq!(quoted, r"$'line one\nit\'s \\ two\ttab\x1b'");
        assert_eq!(unquote(&quoted).unwrap(), value);
    }

    #[test]
    fn test_multi_line_value_survives_later_applies() {
        let dir = tempfile::tempdir().unwrap();
        let env = ShellSnippet::env(dir.path().join(ENV_FILE));
        env.apply(&env_var("GREETING", "a\nb")).unwrap();
        env.apply(&env_var("EDITOR", "vim")).unwrap();
        assert_eq!(
            env.query("GREETING").unwrap(),
            Some(ResourceValue::EnvVar { value: "a\nb".into() })
        );
        assert_eq!(env.list().unwrap(), ["EDITOR", "GREETING"]);
        let written = fs::read_to_string(dir.path().join(ENV_FILE)).unwrap();
        assert_eq!(written.lines().count(), 3);
    }

    #[test]
    fn test_names_that_break_the_file_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = ShellSnippet::env(dir.path().join(ENV_FILE));
        assert!(env.apply(&env_var("A=B", "x")).is_err());
        assert!(env.apply(&env_var("HAS SPACE", "x")).is_err());
        assert!(!dir.path().join(ENV_FILE).exists());
        env.apply(&env_var("EDITOR", "vim")).unwrap();
        assert_eq!(env.list().unwrap(), ["EDITOR"]);
    }

    #[test]
    fn test_unquote_rejects_bare_text() {
        assert!(unquote("vim").is_err());
        assert!(unquote("'vim").is_err());
        assert!(unquote(r"$'vim").is_err());
        assert!(unquote(r"$'\q'").is_err());
    }

    #[test]
    fn test_file_is_sorted_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let env = ShellSnippet::env(dir.path().join(ENV_FILE));
        env.apply(&env_var("PAGER", "less")).unwrap();
        env.apply(&env_var("EDITOR", "vim")).unwrap();
        let written = fs::read_to_string(dir.path().join(ENV_FILE)).unwrap();
        assert_eq!(
            written,
            format!("{HEADER}export EDITOR='vim'\nexport PAGER='less'\n")
        );
        assert_eq!(env.list().unwrap(), ["EDITOR", "PAGER"]);
    }

    #[test]
    fn test_aliases_apply_query_remove() {
        let dir = tempfile::tempdir().unwrap();
        let aliases = ShellSnippet::aliases(dir.path().join(ALIAS_FILE));
        let ll = ResourceDeclaration::new(
            "ll",
            ResourceValue::Alias {
                command: "ls -l".into(),
            },
            "test",
        );
        aliases.apply(&ll).unwrap();
        assert_eq!(aliases.query("ll").unwrap(), Some(ll.value.clone()));
        aliases.remove("ll").unwrap();
        assert_eq!(aliases.query("ll").unwrap(), None);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let aliases = ShellSnippet::aliases(dir.path().join(ALIAS_FILE));
        assert!(aliases.apply(&env_var("EDITOR", "vim")).is_err());
    }

    #[test]
    fn test_hand_edited_garbage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE);
        fs::write(&path, "export EDITOR='vim'\nset -e\n").unwrap();
        let err = ShellSnippet::env(&path).list().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
