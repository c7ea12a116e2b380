//! Resource identities and desired/observed values
//!
//! A resource is identified by its kind and a name (`package:git`,
//! `user:chris`). The same [`ResourceValue`] shape describes both what a
//! declaration wants and what a probe found, so diffing is a structural
//! comparison.

use crate::attr::AttributeNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of resources the engine manages
///
/// The variant order is the canonical kind order used wherever resources
/// are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "package")]
    Package,
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "env")]
    EnvVar,
    #[serde(rename = "file")]
    FileContent,
    #[serde(rename = "alias")]
    Alias,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        Self::Package,
        Self::Service,
        Self::User,
        Self::EnvVar,
        Self::FileContent,
        Self::Alias,
    ];

    /// Stable textual name, the prefix of an identity key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Service => "service",
            Self::User => "user",
            Self::EnvVar => "env",
            Self::FileContent => "file",
            Self::Alias => "alias",
        }
    }

    /// Position in the removal order; dependents go first
    pub fn removal_rank(&self) -> u8 {
        match self {
            Self::Service => 0,
            Self::Alias => 1,
            Self::EnvVar => 2,
            Self::FileContent => 3,
            Self::User => 4,
            Self::Package => 5,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package" | "packages" => Ok(Self::Package),
            "service" | "services" => Ok(Self::Service),
            "user" | "users" => Ok(Self::User),
            "env" | "envvar" | "variables" => Ok(Self::EnvVar),
            "file" | "files" => Ok(Self::FileContent),
            "alias" | "aliases" => Ok(Self::Alias),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

/// Identity key: the kind/name pair that matches a declaration with its
/// observed counterpart
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    /// Parse `kind:name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| format!("'{s}' is not of the form kind:name"))?;
        if name.is_empty() {
            return Err(format!("'{s}' has an empty name"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

/// Comparable state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceValue {
    /// `version: None` in a declaration accepts any installed version
    Package { version: Option<String> },
    Service { active: bool, config_hash: String },
    User {
        home: String,
        shell: Option<String>,
        groups: Vec<String>,
        normal: bool,
    },
    EnvVar { value: String },
    FileContent { content: String, mode: String },
    Alias { command: String },
}

/// One differing field between a desired and an observed value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: String,
    pub to: String,
}

impl ResourceValue {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Package { .. } => ResourceKind::Package,
            Self::Service { .. } => ResourceKind::Service,
            Self::User { .. } => ResourceKind::User,
            Self::EnvVar { .. } => ResourceKind::EnvVar,
            Self::FileContent { .. } => ResourceKind::FileContent,
            Self::Alias { .. } => ResourceKind::Alias,
        }
    }

    /// Named fields with display renderings, in a fixed order
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Package { version } => vec![(
                "version",
                version.clone().unwrap_or_else(|| "any".to_string()),
            )],
            Self::Service {
                active,
                config_hash,
            } => vec![
                ("active", active.to_string()),
                ("config", short_hash(config_hash)),
            ],
            Self::User {
                home,
                shell,
                groups,
                normal,
            } => vec![
                ("home", home.clone()),
                ("shell", shell.clone().unwrap_or_else(|| "default".to_string())),
                ("groups", format!("[{}]", groups.join(", "))),
                ("normal", normal.to_string()),
            ],
            Self::EnvVar { value } => vec![("value", value.clone())],
            Self::FileContent { content, mode } => vec![
                ("content", describe_content(content)),
                ("mode", mode.clone()),
            ],
            Self::Alias { command } => vec![("command", command.clone())],
        }
    }

    /// Whether `observed` already satisfies this desired value
    pub fn converged(&self, observed: &ResourceValue) -> bool {
        match (self, observed) {
            (Self::Package { version: None }, Self::Package { .. }) => true,
            (desired, observed) => desired == observed,
        }
    }

    /// Fields of `observed` that differ from this desired value
    pub fn changes_from(&self, observed: &ResourceValue) -> Vec<FieldChange> {
        if self.converged(observed) {
            return Vec::new();
        }
        if self.kind() != observed.kind() {
            return vec![FieldChange {
                field: "kind".to_string(),
                from: observed.kind().to_string(),
                to: self.kind().to_string(),
            }];
        }
        self.fields()
            .into_iter()
            .zip(observed.fields())
            .filter(|((_, want), (_, have))| want != have)
            .map(|((field, want), (_, have))| FieldChange {
                field: field.to_string(),
                from: have,
                to: want,
            })
            .collect()
    }

    /// One-line rendering used in conflict messages
    pub fn summary(&self) -> String {
        self.fields()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A typed, identity-keyed declaration of desired state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDeclaration {
    pub id: ResourceId,
    pub value: ResourceValue,
    /// Raw settings a service is applied with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<AttributeNode>,
    /// Resources that must be applied before this one
    pub requires: Vec<ResourceId>,
    /// Dotted path of the declaration site
    pub origin: String,
}

impl ResourceDeclaration {
    /// The identity kind always follows the value's kind
    pub fn new(name: impl Into<String>, value: ResourceValue, origin: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(value.kind(), name),
            value,
            settings: None,
            requires: Vec::new(),
            origin: origin.into(),
        }
    }

    /// A declaration standing in for an observed resource nothing declares
    pub fn observed(id: ResourceId, value: ResourceValue) -> Self {
        Self {
            id,
            value,
            settings: None,
            requires: Vec::new(),
            origin: "observed".to_string(),
        }
    }

    pub fn with_settings(mut self, settings: AttributeNode) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn requiring(mut self, dependency: ResourceId) -> Self {
        if !self.requires.contains(&dependency) {
            self.requires.push(dependency);
        }
        self
    }
}

/// Hash of a service's settings, independent of key order
pub fn config_hash(settings: &AttributeNode) -> String {
    blake3::hash(settings.canonical().to_string().as_bytes())
        .to_hex()
        .to_string()
}

fn short_hash(hash: &str) -> String {
    if hash.is_empty() {
        "none".to_string()
    } else {
        hash.chars().take(12).collect()
    }
}

fn describe_content(content: &str) -> String {
    let digest = blake3::hash(content.as_bytes()).to_hex();
    format!("{} bytes ({})", content.len(), &digest.as_str()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_id() {
        let id: ResourceId = "user:chris".parse().unwrap();
        assert_eq!(id, ResourceId::new(ResourceKind::User, "chris"));
        assert_eq!(id.to_string(), "user:chris");

        let id: ResourceId = "file:/etc/hosts".parse().unwrap();
        assert_eq!(id.name, "/etc/hosts");

        assert!("chris".parse::<ResourceId>().is_err());
        assert!("daemon:ssh".parse::<ResourceId>().is_err());
        assert!("user:".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_unpinned_package_accepts_any_version() {
        let desired = ResourceValue::Package { version: None };
        let observed = ResourceValue::Package {
            version: Some("2.45.1".into()),
        };
        assert!(desired.converged(&observed));
        assert!(desired.changes_from(&observed).is_empty());
    }

    #[test]
    fn test_pinned_package_reports_version_change() {
        let desired = ResourceValue::Package {
            version: Some("2.46.0".into()),
        };
        let observed = ResourceValue::Package {
            version: Some("2.45.1".into()),
        };
        assert_eq!(
            desired.changes_from(&observed),
            vec![FieldChange {
                field: "version".into(),
                from: "2.45.1".into(),
                to: "2.46.0".into(),
            }]
        );
    }

    #[test]
    fn test_user_changes_list_only_differing_fields() {
        let desired = ResourceValue::User {
            home: "/home/chris".into(),
            shell: Some("/bin/zsh".into()),
            groups: vec!["wheel".into()],
            normal: true,
        };
        let observed = ResourceValue::User {
            home: "/home/chris".into(),
            shell: Some("/bin/bash".into()),
            groups: vec!["wheel".into()],
            normal: true,
        };
        let changes = desired.changes_from(&observed);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "shell");
    }

    #[test]
    fn test_config_hash_ignores_key_order() {
        let a: AttributeNode = crate::attr::Mapping::from_iter([
            ("Port".to_string(), AttributeNode::int(22)),
            ("PermitRootLogin".to_string(), AttributeNode::str("no")),
        ])
        .into();
        let b: AttributeNode = crate::attr::Mapping::from_iter([
            ("PermitRootLogin".to_string(), AttributeNode::str("no")),
            ("Port".to_string(), AttributeNode::int(22)),
        ])
        .into();
        assert_eq!(config_hash(&a), config_hash(&b));
        assert_ne!(config_hash(&a), config_hash(&AttributeNode::empty_mapping()));
    }

    #[test]
    fn test_kind_names_round_trip_through_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
    }
}
