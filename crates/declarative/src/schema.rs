//! Option schema
//!
//! Option definitions keyed by dotted path patterns where `*` matches any
//! single key (`users.users.*.shell`). The validator checks a parsed tree
//! against a [`Schema`]; [`Schema::builtin`] describes a workstation.

use crate::attr::{AttributeNode, Scalar};
use crate::error::ValidationError;
use crate::resource::ResourceKind;

/// Type of an option value
#[derive(Debug, Clone, PartialEq)]
pub enum OptionType {
    Bool,
    Int,
    /// Accepts integers too
    Float,
    Str,
    ListOf(Box<OptionType>),
    AttrsOf(Box<OptionType>),
    Any,
}

impl OptionType {
    pub fn list_of(inner: OptionType) -> Self {
        Self::ListOf(Box::new(inner))
    }

    pub fn attrs_of(inner: OptionType) -> Self {
        Self::AttrsOf(Box::new(inner))
    }

    /// Human readable form used in `expected` messages
    pub fn describe(&self) -> String {
        match self {
            Self::Bool => "boolean".to_string(),
            Self::Int => "integer".to_string(),
            Self::Float => "float".to_string(),
            Self::Str => "string".to_string(),
            Self::ListOf(inner) => format!("list of {}", inner.describe()),
            Self::AttrsOf(inner) => format!("attribute set of {}", inner.describe()),
            Self::Any => "anything".to_string(),
        }
    }

    /// Check `node` against this type, collecting every mismatch
    pub fn check(&self, node: &AttributeNode, path: &str, errors: &mut Vec<ValidationError>) {
        let ok = match (self, node) {
            (Self::Any, _) => true,
            (Self::Bool, AttributeNode::Scalar(Scalar::Bool(_))) => true,
            (Self::Int, AttributeNode::Scalar(Scalar::Int(_))) => true,
            (Self::Float, AttributeNode::Scalar(Scalar::Float(_) | Scalar::Int(_))) => true,
            (Self::Str, AttributeNode::Scalar(Scalar::Str(_))) => true,
            (Self::ListOf(inner), AttributeNode::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.check(item, &format!("{path}[{i}]"), errors);
                }
                true
            }
            (Self::AttrsOf(inner), AttributeNode::Mapping(mapping)) => {
                for (key, value) in mapping.iter() {
                    inner.check(value, &format!("{path}.{key}"), errors);
                }
                true
            }
            _ => false,
        };
        if !ok {
            errors.push(ValidationError {
                path: path.to_string(),
                expected: self.describe(),
                found: node.type_name().to_string(),
            });
        }
    }
}

/// Shape a string must have beyond its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Environment variable name: `[A-Za-z_][A-Za-z0-9_]*`
    VariableName,
    /// Alias name: no whitespace, quotes, `=`, `$`, `/` or leading `-`
    AliasName,
    /// Octal permission bits up to `7777`
    OctalMode,
    /// Relative path without empty, `.` or `..` components
    RelativePath,
}

impl Format {
    pub fn describe(self) -> &'static str {
        match self {
            Self::VariableName => "a variable name",
            Self::AliasName => "an alias name",
            Self::OctalMode => "an octal mode such as \"0644\"",
            Self::RelativePath => "a relative path without '..'",
        }
    }

    pub fn accepts(self, text: &str) -> bool {
        match self {
            Self::VariableName => {
                let mut chars = text.chars();
                chars
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            Self::AliasName => {
                !text.is_empty()
                    && !text.starts_with('-')
                    && !text.chars().any(|c| {
                        c.is_whitespace()
                            || c.is_control()
                            || matches!(c, '=' | '\'' | '"' | '\\' | '$' | '`' | '/')
                    })
            }
            Self::OctalMode => normalize_mode(text).is_some(),
            Self::RelativePath => {
                !text.is_empty()
                    && text
                        .split('/')
                        .all(|part| !matches!(part, "" | "." | ".."))
            }
        }
    }
}

/// Canonical four-digit form of an octal mode (`"644"` becomes `"0644"`)
pub fn normalize_mode(text: &str) -> Option<String> {
    if text.is_empty() || text.len() > 4 || !text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(text, 8).ok().map(|bits| format!("{bits:04o}"))
}

/// One option definition
#[derive(Debug, Clone)]
pub struct OptionDef {
    pattern: Vec<String>,
    pub ty: OptionType,
    pub default: Option<AttributeNode>,
    /// Allowed scalar values; checked per element for lists
    pub allowed: Vec<Scalar>,
    /// Replacement pattern for a deprecated option
    pub replaced_by: Option<Vec<String>>,
    /// Shape of string values
    pub format: Option<Format>,
    /// Shape of the keys the option names: `*` captures and attribute set keys
    pub key_format: Option<Format>,
    pub description: String,
}

impl OptionDef {
    pub fn new(pattern: &str, ty: OptionType) -> Self {
        Self {
            pattern: split(pattern),
            ty,
            default: None,
            allowed: Vec::new(),
            replaced_by: None,
            format: None,
            key_format: None,
            description: String::new(),
        }
    }

    pub fn default_value(mut self, value: AttributeNode) -> Self {
        self.default = Some(value);
        self
    }

    pub fn allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn deprecated(mut self, replacement: &str) -> Self {
        self.replaced_by = Some(split(replacement));
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn key_format(mut self, format: Format) -> Self {
        self.key_format = Some(format);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn pattern(&self) -> String {
        self.pattern.join(".")
    }

    pub fn is_deprecated(&self) -> bool {
        self.replaced_by.is_some()
    }

    /// Match a concrete path, returning the keys `*` segments captured
    fn matches<S: AsRef<str>>(&self, path: &[S]) -> Option<Vec<String>> {
        if self.pattern.len() != path.len() {
            return None;
        }
        let mut captures = Vec::new();
        for (pat, key) in self.pattern.iter().zip(path) {
            if pat == "*" {
                captures.push(key.as_ref().to_string());
            } else if pat != key.as_ref() {
                return None;
            }
        }
        Some(captures)
    }

    /// Whether the option lives strictly below `prefix`
    fn is_below<S: AsRef<str>>(&self, prefix: &[S]) -> bool {
        self.pattern.len() > prefix.len()
            && self
                .pattern
                .iter()
                .zip(prefix)
                .all(|(pat, key)| pat == "*" || pat == key.as_ref())
    }

    fn specificity(&self) -> usize {
        self.pattern.iter().filter(|p| *p != "*").count()
    }

    /// Concrete replacement path with captured wildcards carried over
    pub fn replacement(&self, captures: &[String]) -> Option<Vec<String>> {
        let pattern = self.replaced_by.as_ref()?;
        let mut captures = captures.iter();
        Some(
            pattern
                .iter()
                .map(|seg| {
                    if seg == "*" {
                        captures.next().cloned().unwrap_or_else(|| seg.clone())
                    } else {
                        seg.clone()
                    }
                })
                .collect(),
        )
    }

    /// Allowed-value check for a node of the right type
    pub fn check_allowed(&self, node: &AttributeNode, path: &str, errors: &mut Vec<ValidationError>) {
        if self.allowed.is_empty() {
            return;
        }
        let expected = || {
            let values: Vec<String> = self.allowed.iter().map(render).collect();
            format!("one of {}", values.join(", "))
        };
        let mut check = |value: &AttributeNode, path: String| {
            if let AttributeNode::Scalar(s) = value
                && !self.allowed.contains(s)
            {
                errors.push(ValidationError {
                    path,
                    expected: expected(),
                    found: render(s),
                });
            }
        };
        match node {
            AttributeNode::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, format!("{path}[{i}]"));
                }
            }
            other => check(other, path.to_string()),
        }
    }
}

impl OptionDef {
    /// Format checks for the node at `path`, which matched this option
    pub fn check_format<S: AsRef<str>>(
        &self,
        node: &AttributeNode,
        path: &[S],
        errors: &mut Vec<ValidationError>,
    ) {
        let dotted = |segments: &[S]| {
            segments
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(".")
        };
        if let Some(format) = self.key_format {
            let mut reject = |key: &str, at: String| {
                let error = ValidationError {
                    path: at,
                    expected: format.describe().to_string(),
                    found: format!("{key:?}"),
                };
                // Sibling options under one `*` report the same capture
                if !format.accepts(key) && !errors.contains(&error) {
                    errors.push(error);
                }
            };
            for (depth, segment) in self.pattern.iter().enumerate() {
                if segment == "*"
                    && let Some(key) = path.get(depth)
                {
                    reject(key.as_ref(), dotted(&path[..=depth]));
                }
            }
            if let Some(mapping) = node.as_mapping() {
                let here = dotted(path);
                for key in mapping.keys() {
                    reject(key, format!("{here}.{key}"));
                }
            }
        }
        if let Some(format) = self.format
            && let Some(text) = node.as_str()
            && !format.accepts(text)
        {
            errors.push(ValidationError {
                path: dotted(path),
                expected: format.describe().to_string(),
                found: format!("{text:?}"),
            });
        }
    }
}

fn render(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Str(s) => format!("{s:?}"),
        other => other.to_plain_string(),
    }
}

fn split(pattern: &str) -> Vec<String> {
    pattern.split('.').map(str::to_string).collect()
}

/// A matched option and the keys its wildcards captured
#[derive(Debug)]
pub struct OptionMatch<'s> {
    pub option: &'s OptionDef,
    pub captures: Vec<String>,
}

/// Ordered set of option definitions
#[derive(Debug, Clone, Default)]
pub struct Schema {
    options: Vec<OptionDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, option: OptionDef) -> &mut Self {
        self.options.push(option);
        self
    }

    pub fn with(mut self, option: OptionDef) -> Self {
        self.options.push(option);
        self
    }

    pub fn options(&self) -> impl Iterator<Item = &OptionDef> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Most specific option matching `path`; ties go to the first declared
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<OptionMatch<'_>> {
        let mut best: Option<OptionMatch<'_>> = None;
        for option in &self.options {
            if let Some(captures) = option.matches(path) {
                let better = best
                    .as_ref()
                    .is_none_or(|b| option.specificity() > b.option.specificity());
                if better {
                    best = Some(OptionMatch { option, captures });
                }
            }
        }
        best
    }

    /// Whether some option lives strictly below `path`
    pub fn is_namespace<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.options.iter().any(|o| o.is_below(path))
    }

    /// The schema the CLI validates against
    pub fn builtin() -> Self {
        let kinds = ResourceKind::ALL.iter().map(|k| k.as_str());
        Self::new()
            // Boot
            .with(
                OptionDef::new("boot.loader.systemd-boot.enable", OptionType::Bool)
                    .default_value(AttributeNode::bool(false))
                    .describe("Use systemd-boot as the boot loader"),
            )
            .with(
                OptionDef::new("boot.loader.efi.canTouchEfiVariables", OptionType::Bool)
                    .default_value(AttributeNode::bool(false))
                    .describe("Allow the installer to modify EFI variables"),
            )
            .with(
                OptionDef::new("boot.loader.grub.enable", OptionType::Bool)
                    .default_value(AttributeNode::bool(false))
                    .describe("Use GRUB as the boot loader"),
            )
            .with(
                OptionDef::new("boot.loader.grub.device", OptionType::Str)
                    .describe("Device GRUB is installed to"),
            )
            // Host
            .with(
                OptionDef::new("networking.hostName", OptionType::Str)
                    .describe("Host name, written to /etc/hostname"),
            )
            .with(OptionDef::new("time.timeZone", OptionType::Str).describe("Time zone"))
            .with(
                OptionDef::new("i18n.defaultLocale", OptionType::Str)
                    .describe("Default locale"),
            )
            // Environment
            .with(
                OptionDef::new(
                    "environment.systemPackages",
                    OptionType::list_of(OptionType::Str),
                )
                .describe("Packages installed system wide; name@version pins a version"),
            )
            .with(
                OptionDef::new("environment.packages", OptionType::list_of(OptionType::Str))
                    .deprecated("environment.systemPackages")
                    .describe("Old name of environment.systemPackages"),
            )
            .with(
                OptionDef::new(
                    "environment.variables",
                    OptionType::attrs_of(OptionType::Str),
                )
                .key_format(Format::VariableName)
                .describe("Environment variables exported to login shells"),
            )
            .with(
                OptionDef::new(
                    "environment.shellAliases",
                    OptionType::attrs_of(OptionType::Str),
                )
                .key_format(Format::AliasName)
                .describe("Shell aliases"),
            )
            .with(
                OptionDef::new(
                    "programs.bash.shellAliases",
                    OptionType::attrs_of(OptionType::Str),
                )
                .key_format(Format::AliasName)
                .describe("Shell aliases for bash"),
            )
            .with(
                OptionDef::new("environment.etc.*.text", OptionType::Str)
                    .key_format(Format::RelativePath)
                    .describe("Content of /etc/<name>"),
            )
            .with(
                OptionDef::new("environment.etc.*.mode", OptionType::Str)
                    .default_value(AttributeNode::str("0644"))
                    .format(Format::OctalMode)
                    .key_format(Format::RelativePath)
                    .describe("Octal permissions of /etc/<name>"),
            )
            // Services
            .with(
                OptionDef::new("services.*.enable", OptionType::Bool)
                    .default_value(AttributeNode::bool(false))
                    .describe("Run the service"),
            )
            .with(
                OptionDef::new("services.*.package", OptionType::Str)
                    .describe("Package providing the service"),
            )
            .with(
                OptionDef::new("services.*.user", OptionType::Str)
                    .describe("Account the service runs as"),
            )
            .with(
                OptionDef::new("services.*.requires", OptionType::list_of(OptionType::Str))
                    .describe("Resources (kind:name) applied before the service"),
            )
            .with(
                OptionDef::new(
                    "services.*.settings",
                    OptionType::attrs_of(OptionType::Any),
                )
                .describe("Service configuration; changes are detected by hash"),
            )
            // Users
            .with(
                OptionDef::new("users.users.*.isNormalUser", OptionType::Bool)
                    .default_value(AttributeNode::bool(true))
                    .describe("Interactive account with a home directory"),
            )
            .with(OptionDef::new("users.users.*.home", OptionType::Str).describe("Home directory"))
            .with(OptionDef::new("users.users.*.shell", OptionType::Str).describe("Login shell"))
            .with(
                OptionDef::new(
                    "users.users.*.extraGroups",
                    OptionType::list_of(OptionType::Str),
                )
                .describe("Supplementary groups"),
            )
            .with(
                OptionDef::new(
                    "users.users.*.packages",
                    OptionType::list_of(OptionType::Str),
                )
                .describe("Packages installed for the user"),
            )
            .with(
                OptionDef::new(
                    "users.users.*.requires",
                    OptionType::list_of(OptionType::Str),
                )
                .describe("Resources (kind:name) applied before the user"),
            )
            // Engine
            .with(
                OptionDef::new("converge.exclusive", OptionType::list_of(OptionType::Str))
                    .allowed(kinds)
                    .describe("Resource kinds whose undeclared resources are removed"),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_prefers_specific_pattern() {
        let schema = Schema::new()
            .with(OptionDef::new("services.*.enable", OptionType::Bool))
            .with(OptionDef::new("services.ssh.enable", OptionType::Str));
        let found = schema.lookup(&["services", "ssh", "enable"]).unwrap();
        assert_eq!(found.option.ty, OptionType::Str);
        assert!(found.captures.is_empty());

        let found = schema.lookup(&["services", "cups", "enable"]).unwrap();
        assert_eq!(found.option.ty, OptionType::Bool);
        assert_eq!(found.captures, vec!["cups".to_string()]);
    }

    #[test]
    fn test_namespaces() {
        let schema = Schema::builtin();
        assert!(schema.is_namespace(&["services"]));
        assert!(schema.is_namespace(&["services", "ssh"]));
        assert!(schema.is_namespace(&["users", "users", "chris"]));
        assert!(!schema.is_namespace(&["networking", "hostName"]));
        assert!(!schema.is_namespace(&["programs", "zsh"]));
    }

    #[test]
    fn test_type_check_collects_nested_errors() {
        let ty = OptionType::list_of(OptionType::Str);
        let node = AttributeNode::List(vec![AttributeNode::str("git"), AttributeNode::int(3)]);
        let mut errors = Vec::new();
        ty.check(&node, "environment.systemPackages", &mut errors);
        assert_eq!(
            errors,
            vec![ValidationError {
                path: "environment.systemPackages[1]".into(),
                expected: "string".into(),
                found: "integer".into(),
            }]
        );
    }

    #[test]
    fn test_float_accepts_int() {
        let mut errors = Vec::new();
        OptionType::Float.check(&AttributeNode::int(1), "x", &mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_allowed_values_checked_per_element() {
        let schema = Schema::builtin();
        let found = schema.lookup(&["converge", "exclusive"]).unwrap();
        let node = AttributeNode::List(vec![AttributeNode::str("package"), AttributeNode::str("daemon")]);
        let mut errors = Vec::new();
        found.option.check_allowed(&node, "converge.exclusive", &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "converge.exclusive[1]");
        assert_eq!(errors[0].found, "\"daemon\"");
    }

    #[test]
    fn test_formats() {
        assert!(Format::VariableName.accepts("EDITOR"));
        assert!(Format::VariableName.accepts("_x1"));
        assert!(!Format::VariableName.accepts("1X"));
        assert!(!Format::VariableName.accepts("A B"));
        assert!(!Format::VariableName.accepts(""));

        assert!(Format::AliasName.accepts("ll"));
        assert!(Format::AliasName.accepts("git-log"));
        assert!(!Format::AliasName.accepts("a=b"));
        assert!(!Format::AliasName.accepts("a b"));
        assert!(!Format::AliasName.accepts("-x"));

        assert!(Format::RelativePath.accepts("motd"));
        assert!(Format::RelativePath.accepts("ssh/sshd_config"));
        assert!(!Format::RelativePath.accepts("../../x"));
        assert!(!Format::RelativePath.accepts("a/../b"));
        assert!(!Format::RelativePath.accepts("/abs"));
    }

    #[test]
    fn test_normalize_mode() {
        assert_eq!(normalize_mode("644").as_deref(), Some("0644"));
        assert_eq!(normalize_mode("0600").as_deref(), Some("0600"));
        assert_eq!(normalize_mode("7").as_deref(), Some("0007"));
        assert_eq!(normalize_mode("0o644"), None);
        assert_eq!(normalize_mode("0800"), None);
        assert_eq!(normalize_mode("10644"), None);
        assert_eq!(normalize_mode("rw-r--r--"), None);
        assert_eq!(normalize_mode(""), None);
    }

    #[test]
    fn test_key_format_checks_captures_and_keys() {
        let schema = Schema::builtin();
        let mut errors = Vec::new();

        let text = ["environment", "etc", "..", "text"];
        let mode = ["environment", "etc", "..", "mode"];
        for path in [text, mode] {
            let found = schema.lookup(&path).unwrap();
            found.option.check_format(&AttributeNode::str("0644"), &path, &mut errors);
        }
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "environment.etc...");

        let path = ["environment", "shellAliases"];
        let aliases = schema.lookup(&path).unwrap();
        let mut node = AttributeNode::empty_mapping();
        node.insert_path(&["a=b"], AttributeNode::str("ls")).unwrap();
        node.insert_path(&["ll"], AttributeNode::str("ls -l")).unwrap();
        aliases.option.check_format(&node, &path, &mut errors);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].path, "environment.shellAliases.a=b");
    }

    #[test]
    fn test_deprecated_replacement_carries_wildcards() {
        let option = OptionDef::new("services.*.enabled", OptionType::Bool)
            .deprecated("services.*.enable");
        let captures = option.matches(&["services", "ssh", "enabled"]).unwrap();
        assert_eq!(
            option.replacement(&captures),
            Some(vec!["services".into(), "ssh".into(), "enable".into()])
        );
    }
}
