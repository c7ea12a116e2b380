//! Attribute tree - the in-memory form of a declaration file
//!
//! The parser produces an [`AttributeNode`] tree, the validator checks it
//! against a schema and the model builder lowers it into resources.
//! Mappings keep declaration order (it decides plan tie-breaks) but compare
//! equal regardless of order.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// A leaf value
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Name of the scalar's type as used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// Plain text rendering, used for interpolation
    pub fn to_plain_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A node of the attribute tree
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeNode {
    Scalar(Scalar),
    List(Vec<AttributeNode>),
    Mapping(Mapping),
}

/// Insertion-ordered mapping with unique keys
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    entries: Vec<(String, AttributeNode)>,
}

/// Two values could not be merged at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub path: Vec<String>,
}

impl MergeConflict {
    fn at_root() -> Self {
        Self { path: Vec::new() }
    }

    fn under(mut self, key: &str) -> Self {
        self.path.insert(0, key.to_string());
        self
    }

    /// Dotted rendering of the conflicting path
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

// ============================================================================
// Mapping
// ============================================================================

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&AttributeNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut AttributeNode> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value; a replaced key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: AttributeNode) -> Option<AttributeNode> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeNode> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Merge `value` into the entry for `key`
    pub fn merge_entry(&mut self, key: &str, value: AttributeNode) -> Result<(), MergeConflict> {
        match self.get_mut(key) {
            Some(slot) => slot.merge_from(value).map_err(|conflict| conflict.under(key)),
            None => {
                self.entries.push((key.to_string(), value));
                Ok(())
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeNode)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn sorted(&self) -> Self {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.canonical()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl FromIterator<(String, AttributeNode)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, AttributeNode)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

impl Serialize for Mapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ============================================================================
// AttributeNode
// ============================================================================

impl AttributeNode {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Str(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }

    pub fn empty_mapping() -> Self {
        Self::Mapping(Mapping::new())
    }

    /// Name of the node's type as used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(s) => s.type_name(),
            Self::List(_) => "list",
            Self::Mapping(_) => "attribute set",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeNode]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Follow a key path through nested mappings
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&AttributeNode> {
        path.iter()
            .try_fold(self, |node, key| node.as_mapping()?.get(key.as_ref()))
    }

    /// Look up a dotted path such as `networking.hostName`
    pub fn lookup(&self, dotted: &str) -> Option<&AttributeNode> {
        let path: Vec<&str> = dotted.split('.').collect();
        self.get_path(&path)
    }

    /// Insert `value` at `path`, creating intermediate mappings and merging
    /// with whatever is already there
    pub fn insert_path<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: AttributeNode,
    ) -> Result<(), MergeConflict> {
        let Some((last, parents)) = path.split_last() else {
            return self.merge_from(value);
        };

        let mut node = self;
        for (depth, key) in parents.iter().enumerate() {
            let mapping = node.as_mapping_mut().ok_or_else(|| MergeConflict {
                path: path[..depth].iter().map(|k| k.as_ref().to_string()).collect(),
            })?;
            if !mapping.contains_key(key.as_ref()) {
                mapping.insert(key.as_ref(), AttributeNode::empty_mapping());
            }
            node = mapping
                .get_mut(key.as_ref())
                .ok_or_else(MergeConflict::at_root)?;
        }

        let mapping = node.as_mapping_mut().ok_or_else(|| MergeConflict {
            path: parents.iter().map(|k| k.as_ref().to_string()).collect(),
        })?;
        mapping.merge_entry(last.as_ref(), value).map_err(|mut conflict| {
            let mut full: Vec<String> = parents.iter().map(|k| k.as_ref().to_string()).collect();
            full.append(&mut conflict.path);
            MergeConflict { path: full }
        })
    }

    /// Remove and return the value at `path`
    pub fn remove_path<S: AsRef<str>>(&mut self, path: &[S]) -> Option<AttributeNode> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for key in parents {
            node = node.as_mapping_mut()?.get_mut(key.as_ref())?;
        }
        node.as_mapping_mut()?.remove(last.as_ref())
    }

    /// Total merge of two trees
    ///
    /// Mappings merge key by key, equal values collapse, anything else is
    /// a conflict at the deepest differing path.
    pub fn merge(self, other: AttributeNode) -> Result<AttributeNode, MergeConflict> {
        let mut merged = self;
        merged.merge_from(other)?;
        Ok(merged)
    }

    /// In-place form of [`AttributeNode::merge`]
    pub fn merge_from(&mut self, other: AttributeNode) -> Result<(), MergeConflict> {
        match (self, other) {
            (AttributeNode::Mapping(left), AttributeNode::Mapping(right)) => {
                for (key, value) in right.entries {
                    left.merge_entry(&key, value)?;
                }
                Ok(())
            }
            (left, right) if *left == right => Ok(()),
            _ => Err(MergeConflict::at_root()),
        }
    }

    /// Copy of the tree with mapping keys sorted, used for hashing
    pub fn canonical(&self) -> AttributeNode {
        match self {
            Self::Scalar(s) => Self::Scalar(s.clone()),
            Self::List(items) => Self::List(items.iter().map(Self::canonical).collect()),
            Self::Mapping(m) => Self::Mapping(m.sorted()),
        }
    }

    /// Render the tree as a declaration file
    ///
    /// A top-level mapping becomes a list of bindings; parsing the output
    /// yields an equal tree.
    pub fn to_document(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Mapping(m) => write_bindings(&mut out, m, 0),
            other => {
                write_value(&mut out, other, 0);
                out.push('\n');
            }
        }
        out
    }
}

impl Serialize for AttributeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(s) => s.serialize(serializer),
            Self::List(items) => items.serialize(serializer),
            Self::Mapping(m) => m.serialize(serializer),
        }
    }
}

impl From<Scalar> for AttributeNode {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Mapping> for AttributeNode {
    fn from(value: Mapping) -> Self {
        Self::Mapping(value)
    }
}

impl fmt::Display for AttributeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_value(&mut out, self, 0);
        f.write_str(&out)
    }
}

// ============================================================================
// Pretty printer
// ============================================================================

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn write_bindings(out: &mut String, mapping: &Mapping, level: usize) {
    for (key, value) in mapping.iter() {
        indent(out, level);
        write_key(out, key);
        out.push_str(" = ");
        write_value(out, value, level);
        out.push_str(";\n");
    }
}

fn write_value(out: &mut String, node: &AttributeNode, level: usize) {
    match node {
        AttributeNode::Scalar(s) => write_scalar(out, s),
        AttributeNode::Mapping(m) if m.is_empty() => out.push_str("{ }"),
        AttributeNode::Mapping(m) => {
            out.push_str("{\n");
            write_bindings(out, m, level + 1);
            indent(out, level);
            out.push('}');
        }
        AttributeNode::List(items) if items.is_empty() => out.push_str("[ ]"),
        AttributeNode::List(items) if items.iter().all(|i| matches!(i, AttributeNode::Scalar(_))) => {
            out.push('[');
            for item in items {
                out.push(' ');
                write_value(out, item, level);
            }
            out.push_str(" ]");
        }
        AttributeNode::List(items) => {
            out.push_str("[\n");
            for item in items {
                indent(out, level + 1);
                write_value(out, item, level + 1);
                out.push('\n');
            }
            indent(out, level);
            out.push(']');
        }
    }
}

fn write_scalar(out: &mut String, scalar: &Scalar) {
    match scalar {
        Scalar::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Scalar::Int(i) => out.push_str(&i.to_string()),
        // Debug keeps a decimal point or exponent so the value re-parses as a float
        Scalar::Float(f) => out.push_str(&format!("{f:?}")),
        Scalar::Str(s) => write_quoted(out, s),
    }
}

fn write_key(out: &mut String, key: &str) {
    if is_identifier(key) {
        out.push_str(key);
    } else {
        write_quoted(out, key);
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '$' => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out.push('"');
}

/// Whether `key` can be written without quotes
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(is_identifier_char)
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\'')
}
