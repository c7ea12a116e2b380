//! Schema validation
//!
//! Three passes over the parsed tree: deprecated options are moved to
//! their replacements, every key is checked against the schema, then
//! defaults are filled in under mappings that exist.

use crate::attr::AttributeNode;
use crate::error::{ValidationError, ValidationErrors};
use crate::schema::Schema;
use serde::Serialize;
use std::fmt;

/// A deprecated option was used and moved to its replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub path: String,
    pub replacement: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is deprecated, use {}", self.path, self.replacement)
    }
}

/// A tree that passed validation, with defaults applied
#[derive(Debug, Clone)]
pub struct Validated {
    pub tree: AttributeNode,
    pub warnings: Vec<ValidationWarning>,
}

/// Validate `tree` against `schema`
///
/// All errors are collected and returned together, sorted by path.
pub fn validate(mut tree: AttributeNode, schema: &Schema) -> Result<Validated, ValidationErrors> {
    let mut errors = Vec::new();

    if !matches!(tree, AttributeNode::Mapping(_)) {
        return Err(ValidationErrors::new(vec![ValidationError {
            path: "<root>".to_string(),
            expected: "attribute set".to_string(),
            found: tree.type_name().to_string(),
        }]));
    }

    let warnings = remap_deprecated(&mut tree, schema, &mut errors);
    check_node(&tree, &mut Vec::new(), schema, &mut errors);

    if !errors.is_empty() {
        return Err(ValidationErrors::new(errors));
    }

    apply_defaults(&mut tree, schema, &mut errors);
    if !errors.is_empty() {
        return Err(ValidationErrors::new(errors));
    }
    log::debug!("validated declaration ({} warnings)", warnings.len());
    Ok(Validated { tree, warnings })
}

// ============================================================================
// Deprecation
// ============================================================================

fn remap_deprecated(
    tree: &mut AttributeNode,
    schema: &Schema,
    errors: &mut Vec<ValidationError>,
) -> Vec<ValidationWarning> {
    let mut moves = Vec::new();
    find_deprecated(tree, &mut Vec::new(), schema, &mut moves);

    let mut warnings = Vec::new();
    for (old, new) in moves {
        let (old_dotted, new_dotted) = (old.join("."), new.join("."));
        let Some(value) = tree.remove_path(&old) else {
            continue;
        };
        if let Some(existing) = tree.get_path(&new)
            && *existing != value
        {
            errors.push(ValidationError {
                path: old_dotted,
                expected: format!("the value already set at {new_dotted}"),
                found: "a conflicting value".to_string(),
            });
            continue;
        }
        if tree.insert_path(&new, value).is_err() {
            errors.push(ValidationError {
                path: old_dotted,
                expected: format!("{new_dotted} to be settable"),
                found: "a conflicting parent".to_string(),
            });
            continue;
        }
        log::warn!("{old_dotted} is deprecated, use {new_dotted}");
        warnings.push(ValidationWarning {
            path: old_dotted,
            replacement: new_dotted,
        });
    }
    warnings
}

fn find_deprecated(
    node: &AttributeNode,
    path: &mut Vec<String>,
    schema: &Schema,
    moves: &mut Vec<(Vec<String>, Vec<String>)>,
) {
    let Some(mapping) = node.as_mapping() else {
        return;
    };
    for (key, value) in mapping.iter() {
        path.push(key.to_string());
        match schema.lookup(path.as_slice()) {
            Some(found) => {
                if let Some(replacement) = found.option.replacement(&found.captures) {
                    moves.push((path.clone(), replacement));
                }
            }
            None => find_deprecated(value, path, schema, moves),
        }
        path.pop();
    }
}

// ============================================================================
// Type checks
// ============================================================================

fn check_node(
    node: &AttributeNode,
    path: &mut Vec<String>,
    schema: &Schema,
    errors: &mut Vec<ValidationError>,
) {
    let Some(mapping) = node.as_mapping() else {
        return;
    };
    for (key, value) in mapping.iter() {
        path.push(key.to_string());
        let dotted = path.join(".");
        if let Some(found) = schema.lookup(path.as_slice()) {
            found.option.ty.check(value, &dotted, errors);
            found.option.check_allowed(value, &dotted, errors);
            found.option.check_format(value, path.as_slice(), errors);
        } else if schema.is_namespace(path.as_slice()) {
            if value.as_mapping().is_some() {
                check_node(value, path, schema, errors);
            } else {
                errors.push(ValidationError {
                    path: dotted,
                    expected: "attribute set".to_string(),
                    found: value.type_name().to_string(),
                });
            }
        } else {
            errors.push(ValidationError {
                path: dotted,
                expected: "a known option".to_string(),
                found: "unknown key".to_string(),
            });
        }
        path.pop();
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn apply_defaults(tree: &mut AttributeNode, schema: &Schema, errors: &mut Vec<ValidationError>) {
    for option in schema.options() {
        let Some(default) = &option.default else {
            continue;
        };
        let pattern = option.pattern();
        let segments: Vec<&str> = pattern.split('.').collect();
        let Some((leaf, parent)) = segments.split_last() else {
            continue;
        };

        let mut parents = Vec::new();
        existing_paths(tree, parent, &mut Vec::new(), &mut parents);
        for mut path in parents {
            let present = tree
                .get_path(&path)
                .and_then(AttributeNode::as_mapping)
                .is_some_and(|m| m.contains_key(leaf));
            if present {
                continue;
            }
            path.push((*leaf).to_string());
            let dotted = path.join(".");
            log::trace!("default {dotted} = {default}");
            if let Err(conflict) = tree.insert_path(&path, default.clone()) {
                errors.push(ValidationError {
                    path: dotted,
                    expected: format!("room for the default {default}"),
                    found: format!("a conflicting value at {}", conflict.dotted()),
                });
            }
        }
    }
}

/// Concrete mapping paths in `node` matching `pattern`
fn existing_paths(
    node: &AttributeNode,
    pattern: &[&str],
    prefix: &mut Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    let Some(mapping) = node.as_mapping() else {
        return;
    };
    let Some((head, rest)) = pattern.split_first() else {
        out.push(prefix.clone());
        return;
    };
    for (key, child) in mapping.iter() {
        if *head == "*" || *head == key {
            prefix.push(key.to_string());
            existing_paths(child, rest, prefix, out);
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn check(source: &str) -> Result<Validated, ValidationErrors> {
        let tree = parse(source, &BTreeMap::new()).unwrap();
        validate(tree, &Schema::builtin())
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let errors = check(
            r#"
            services.ssh.enabled = true;
            networking.hostName = "box";
            hardware.cpu = "amd";
            "#,
        )
        .unwrap_err();
        let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["hardware", "services.ssh.enabled"]);
        assert!(errors.iter().all(|e| e.found == "unknown key"));
    }

    #[test]
    fn test_namespace_must_be_mapping() {
        let errors = check("services = true;").unwrap_err();
        assert_eq!(
            errors.0,
            vec![ValidationError {
                path: "services".into(),
                expected: "attribute set".into(),
                found: "boolean".into(),
            }]
        );
    }

    #[test]
    fn test_type_errors_collected() {
        let errors = check(
            r#"
            networking.hostName = 3;
            services.ssh.enable = "yes";
            environment.variables.EDITOR = [ "vim" ];
            "#,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.0[0].path, "environment.variables.EDITOR");
        assert_eq!(errors.0[0].expected, "string");
        assert_eq!(errors.0[0].found, "list");
    }

    #[test]
    fn test_allowed_exclusive_kinds() {
        assert!(check(r#"converge.exclusive = [ "package" "alias" ];"#).is_ok());
        let errors = check(r#"converge.exclusive = [ "daemon" ];"#).unwrap_err();
        assert_eq!(errors.0[0].path, "converge.exclusive[0]");
    }

    #[test]
    fn test_deprecated_option_moves_with_warning() {
        let validated = check(r#"environment.packages = [ "git" ];"#).unwrap();
        assert_eq!(
            validated.warnings,
            vec![ValidationWarning {
                path: "environment.packages".into(),
                replacement: "environment.systemPackages".into(),
            }]
        );
        assert!(validated.tree.lookup("environment.packages").is_none());
        assert_eq!(
            validated.tree.lookup("environment.systemPackages"),
            Some(&AttributeNode::List(vec![AttributeNode::str("git")]))
        );
    }

    #[test]
    fn test_deprecated_option_conflicting_with_replacement() {
        let errors = check(
            r#"
            environment.packages = [ "git" ];
            environment.systemPackages = [ "vim" ];
            "#,
        )
        .unwrap_err();
        assert_eq!(errors.0[0].path, "environment.packages");

        let same = check(
            r#"
            environment.packages = [ "git" ];
            environment.systemPackages = [ "git" ];
            "#,
        );
        assert!(same.is_ok());
    }

    #[test]
    fn test_defaults_only_under_existing_parents() {
        let validated = check(
            r#"
            services.ssh.settings.Port = 22;
            users.users.chris.shell = "/bin/zsh";
            environment.etc."motd".text = "hi";
            "#,
        )
        .unwrap();
        let tree = &validated.tree;
        assert_eq!(tree.lookup("services.ssh.enable"), Some(&AttributeNode::bool(false)));
        assert_eq!(
            tree.lookup("users.users.chris.isNormalUser"),
            Some(&AttributeNode::bool(true))
        );
        assert_eq!(tree.lookup("environment.etc.motd.mode"), Some(&AttributeNode::str("0644")));
        assert!(tree.lookup("boot").is_none());
    }

    #[test]
    fn test_defaults_do_not_override() {
        let validated = check("services.ssh.enable = true;").unwrap();
        assert_eq!(
            validated.tree.lookup("services.ssh.enable"),
            Some(&AttributeNode::bool(true))
        );
    }
    #[test]
    fn test_shell_names_are_checked() {
        let errors = check(
            r#"
            environment.variables = { EDITOR = "vim"; "A=B" = "x"; "has space" = "y"; };
            environment.shellAliases = { ll = "ls -l"; "g s" = "git status"; };
            programs.bash.shellAliases."-x" = "true";
            "#,
        )
        .unwrap_err();
        let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            [
                "environment.shellAliases.g s",
                "environment.variables.A=B",
                "environment.variables.has space",
                "programs.bash.shellAliases.-x",
            ]
        );
        assert_eq!(errors.0[1].expected, "a variable name");
    }

    #[test]
    fn test_etc_mode_must_be_octal() {
        let errors = check(r#"environment.etc."motd" = { text = "hi"; mode = "rw-r--r--"; };"#)
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.0[0].path, "environment.etc.motd.mode");

        assert!(check(r#"environment.etc."motd" = { text = "hi"; mode = "644"; };"#).is_ok());
    }

    #[test]
    fn test_etc_name_cannot_leave_etc() {
        let errors = check(
            r#"environment.etc."../../root/.ssh/authorized_keys" = { text = "k"; mode = "0600"; };"#,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.0[0].expected, "a relative path without '..'");

        assert!(check(r#"environment.etc."ssh/sshd_config".text = "Port 22";"#).is_ok());
    }

    proptest! {
        #[test]
        fn test_random_unknown_key_is_rejected(
            prefix in prop::sample::select(vec!["", "networking.", "time.", "i18n."]),
            key in "[a-z]{1,8}",
        ) {
            let key = format!("{prefix}zz{key}");
            let source = format!(
                r#"
                networking.hostName = "box";
                services.ssh.enable = true;
                environment.etc."motd".text = "hi";
                {key} = 1;
                "#
            );
            let errors = check(&source).unwrap_err();
            prop_assert_eq!(errors.len(), 1);
            prop_assert_eq!(&errors.0[0].path, &key);
            prop_assert_eq!(errors.0[0].found.as_str(), "unknown key");
        }
    }
}
