//! Desired-state model
//!
//! Lowers a validated attribute tree into typed resource declarations and
//! the dependency graph between them.

use crate::attr::{AttributeNode, Mapping};
use crate::error::{ConflictError, ModelError, PlanError};
use crate::graph::DependencyGraph;
use crate::resource::{ResourceDeclaration, ResourceId, ResourceKind, ResourceValue, config_hash};
use crate::schema::normalize_mode;
use crate::validate::Validated;
use std::collections::{BTreeSet, HashMap};

/// Ordered declarations, keyed by identity, plus the kinds managed
/// exclusively
#[derive(Debug, Clone, Default)]
pub struct DesiredStateSet {
    declarations: Vec<ResourceDeclaration>,
    index: HashMap<ResourceId, usize>,
    exclusive: BTreeSet<ResourceKind>,
}

impl DesiredStateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration
    ///
    /// Re-declaring an identity key with the same value collapses into the
    /// first declaration; a different value is a conflict.
    pub fn declare(&mut self, declaration: ResourceDeclaration) -> Result<(), ConflictError> {
        match self.index.get(&declaration.id) {
            Some(&pos) => {
                let existing = &mut self.declarations[pos];
                if existing.value != declaration.value {
                    return Err(ConflictError {
                        key: declaration.id,
                        value_a: existing.value.summary(),
                        value_b: declaration.value.summary(),
                        site_a: existing.origin.clone(),
                        site_b: declaration.origin,
                    });
                }
                for dependency in declaration.requires {
                    if !existing.requires.contains(&dependency) {
                        existing.requires.push(dependency);
                    }
                }
                Ok(())
            }
            None => {
                self.index
                    .insert(declaration.id.clone(), self.declarations.len());
                self.declarations.push(declaration);
                Ok(())
            }
        }
    }

    /// Add a dependency edge `dependency -> id`
    pub fn require(&mut self, id: &ResourceId, dependency: ResourceId) {
        if let Some(&pos) = self.index.get(id) {
            let requires = &mut self.declarations[pos].requires;
            if !requires.contains(&dependency) {
                requires.push(dependency);
            }
        }
    }

    pub fn mark_exclusive(&mut self, kind: ResourceKind) {
        self.exclusive.insert(kind);
    }

    pub fn is_exclusive(&self, kind: ResourceKind) -> bool {
        self.exclusive.contains(&kind)
    }

    pub fn exclusive_kinds(&self) -> &BTreeSet<ResourceKind> {
        &self.exclusive
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDeclaration> {
        self.index.get(id).map(|&pos| &self.declarations[pos])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration order of `id`
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn declarations(&self) -> &[ResourceDeclaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceDeclaration> {
        self.declarations.iter().filter(move |d| d.id.kind == kind)
    }

    /// Kinds with at least one declaration or marked exclusive
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.declarations
            .iter()
            .map(|d| d.id.kind)
            .chain(self.exclusive.iter().copied())
            .collect()
    }

    /// `requires` edges whose target is not declared
    pub fn unknown_dependencies(&self) -> Vec<(ResourceId, ResourceId)> {
        self.declarations
            .iter()
            .flat_map(|d| {
                d.requires
                    .iter()
                    .filter(|r| !self.contains(r))
                    .map(|r| (d.id.clone(), r.clone()))
            })
            .collect()
    }

    /// Graph of every `requires` edge between declared resources
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new(self.declarations.iter().map(|d| d.id.clone()));
        for (pos, declaration) in self.declarations.iter().enumerate() {
            for before in declaration.requires.iter().filter_map(|r| self.position(r)) {
                graph.add_edge(before, pos);
            }
        }
        graph
    }

    /// Declaration positions in dependency order
    pub fn apply_order(&self) -> Result<Vec<usize>, PlanError> {
        self.dependency_graph().topological_order()
    }
}

// ============================================================================
// Lowering
// ============================================================================

/// A dependency added only when its target is declared
struct Implicit {
    from: ResourceId,
    to: ResourceId,
}

#[derive(Default)]
struct Builder {
    set: DesiredStateSet,
    implicit: Vec<Implicit>,
}

/// Lower a validated tree into a desired-state set
///
/// Top-level sections are lowered in file order, which fixes declaration
/// order and therefore plan tie-breaks.
pub fn build(validated: &Validated) -> Result<DesiredStateSet, ModelError> {
    let mut builder = Builder::default();
    let Some(root) = validated.tree.as_mapping() else {
        return Ok(builder.set);
    };

    for (section, node) in root.iter() {
        let Some(node) = node.as_mapping() else {
            continue;
        };
        match section {
            "environment" => builder.environment(node)?,
            "programs" => {
                if let Some(aliases) = node
                    .get("bash")
                    .and_then(|b| b.as_mapping())
                    .and_then(|b| b.get("shellAliases"))
                    .and_then(AttributeNode::as_mapping)
                {
                    builder.aliases(aliases, "programs.bash.shellAliases")?;
                }
            }
            "users" => {
                if let Some(users) = node.get("users").and_then(AttributeNode::as_mapping) {
                    for (name, user) in users.iter() {
                        builder.user(name, user)?;
                    }
                }
            }
            "services" => {
                for (name, service) in node.iter() {
                    builder.service(name, service)?;
                }
            }
            "networking" => {
                if let Some(host) = node.get("hostName").and_then(AttributeNode::as_str) {
                    builder.declare(ResourceDeclaration::new(
                        "/etc/hostname",
                        ResourceValue::FileContent {
                            content: format!("{host}\n"),
                            mode: "0644".to_string(),
                        },
                        "networking.hostName",
                    ))?;
                }
            }
            "converge" => {
                for kind in strings(node.get("exclusive")) {
                    if let Ok(kind) = kind.parse::<ResourceKind>() {
                        builder.set.mark_exclusive(kind);
                    }
                }
            }
            // Boot loader, time zone and locale are validated only
            _ => {}
        }
    }

    builder.finish()
}

impl Builder {
    fn declare(&mut self, declaration: ResourceDeclaration) -> Result<(), ModelError> {
        log::trace!("declare {} from {}", declaration.id, declaration.origin);
        self.set.declare(declaration).map_err(ModelError::Conflict)
    }

    fn environment(&mut self, env: &Mapping) -> Result<(), ModelError> {
        for (key, node) in env.iter() {
            match key {
                "systemPackages" => {
                    for spec in strings(Some(node)) {
                        self.declare(package(spec, "environment.systemPackages"))?;
                    }
                }
                "variables" => {
                    for (name, value) in node.as_mapping().into_iter().flat_map(Mapping::iter) {
                        if let Some(value) = value.as_str() {
                            self.declare(ResourceDeclaration::new(
                                name,
                                ResourceValue::EnvVar {
                                    value: value.to_string(),
                                },
                                format!("environment.variables.{name}"),
                            ))?;
                        }
                    }
                }
                "shellAliases" => {
                    if let Some(aliases) = node.as_mapping() {
                        self.aliases(aliases, "environment.shellAliases")?;
                    }
                }
                "etc" => {
                    for (name, file) in node.as_mapping().into_iter().flat_map(Mapping::iter) {
                        let text = file.lookup("text").and_then(AttributeNode::as_str);
                        let mode = file.lookup("mode").and_then(AttributeNode::as_str);
                        self.declare(ResourceDeclaration::new(
                            format!("/etc/{name}"),
                            ResourceValue::FileContent {
                                content: text.unwrap_or_default().to_string(),
                                mode: mode.map_or_else(
                                    || "0644".to_string(),
                                    |m| normalize_mode(m).unwrap_or_else(|| m.to_string()),
                                ),
                            },
                            format!("environment.etc.{name}"),
                        ))?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn aliases(&mut self, aliases: &Mapping, origin: &str) -> Result<(), ModelError> {
        for (name, command) in aliases.iter() {
            if let Some(command) = command.as_str() {
                self.declare(ResourceDeclaration::new(
                    name,
                    ResourceValue::Alias {
                        command: command.to_string(),
                    },
                    format!("{origin}.{name}"),
                ))?;
            }
        }
        Ok(())
    }

    fn user(&mut self, name: &str, user: &AttributeNode) -> Result<(), ModelError> {
        let origin = format!("users.users.{name}");
        let normal = user
            .lookup("isNormalUser")
            .and_then(AttributeNode::as_bool)
            .unwrap_or(true);
        let home = match user.lookup("home").and_then(AttributeNode::as_str) {
            Some(home) => home.to_string(),
            None if normal => format!("/home/{name}"),
            None => "/var/empty".to_string(),
        };
        let shell = user
            .lookup("shell")
            .and_then(AttributeNode::as_str)
            .map(str::to_string);
        let groups: BTreeSet<String> = strings(user.lookup("extraGroups"))
            .map(str::to_string)
            .collect();

        let id = ResourceId::new(ResourceKind::User, name);
        let mut declaration = ResourceDeclaration::new(
            name,
            ResourceValue::User {
                home,
                shell: shell.clone(),
                groups: groups.into_iter().collect(),
                normal,
            },
            origin.clone(),
        );
        for dependency in references(user.lookup("requires"), &format!("{origin}.requires"))? {
            declaration = declaration.requiring(dependency);
        }
        self.declare(declaration)?;

        if let Some(binary) = shell
            .as_deref()
            .and_then(|s| s.rsplit('/').next())
            .filter(|b| !b.is_empty())
        {
            self.implicit.push(Implicit {
                from: id,
                to: ResourceId::new(ResourceKind::Package, binary),
            });
        }

        for spec in strings(user.lookup("packages")) {
            self.declare(package(spec, &format!("{origin}.packages")))?;
        }
        Ok(())
    }

    fn service(&mut self, name: &str, service: &AttributeNode) -> Result<(), ModelError> {
        let enabled = service
            .lookup("enable")
            .and_then(AttributeNode::as_bool)
            .unwrap_or(false);
        if !enabled {
            log::debug!("service {name} is disabled, not declared");
            return Ok(());
        }

        let origin = format!("services.{name}");
        let settings = service
            .lookup("settings")
            .cloned()
            .unwrap_or_else(AttributeNode::empty_mapping);
        let id = ResourceId::new(ResourceKind::Service, name);
        let mut declaration = ResourceDeclaration::new(
            name,
            ResourceValue::Service {
                active: true,
                config_hash: config_hash(&settings),
            },
            origin.clone(),
        )
        .with_settings(settings);
        for dependency in references(service.lookup("requires"), &format!("{origin}.requires"))? {
            declaration = declaration.requiring(dependency);
        }
        self.declare(declaration)?;

        if let Some(user) = service.lookup("user").and_then(AttributeNode::as_str) {
            self.implicit.push(Implicit {
                from: id.clone(),
                to: ResourceId::new(ResourceKind::User, user),
            });
        }
        if let Some(package) = service.lookup("package").and_then(AttributeNode::as_str) {
            self.implicit.push(Implicit {
                from: id,
                to: ResourceId::new(ResourceKind::Package, package),
            });
        }
        Ok(())
    }

    fn finish(mut self) -> Result<DesiredStateSet, ModelError> {
        for Implicit { from, to } in std::mem::take(&mut self.implicit) {
            if self.set.contains(&to) {
                self.set.require(&from, to);
            }
        }
        if let Some((from, to)) = self.set.unknown_dependencies().into_iter().next() {
            return Err(ModelError::UnknownDependency { from, to });
        }
        let order = self.set.apply_order().map_err(ModelError::Cycle)?;
        log::debug!(
            "modeled {} resources, {} exclusive kinds",
            order.len(),
            self.set.exclusive.len()
        );
        Ok(self.set)
    }
}

/// Package declaration from `name` or `name@version`
fn package(spec: &str, origin: &str) -> ResourceDeclaration {
    let (name, version) = match spec.split_once('@') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            (name, Some(version.to_string()))
        }
        _ => (spec, None),
    };
    ResourceDeclaration::new(name, ResourceValue::Package { version }, origin)
}

fn strings(node: Option<&AttributeNode>) -> impl Iterator<Item = &str> {
    node.and_then(AttributeNode::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(AttributeNode::as_str)
}

fn references(node: Option<&AttributeNode>, path: &str) -> Result<Vec<ResourceId>, ModelError> {
    strings(node)
        .map(|value| {
            value
                .parse::<ResourceId>()
                .map_err(|_| ModelError::InvalidReference {
                    path: path.to_string(),
                    value: value.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::schema::Schema;
    use crate::validate::validate;
    use std::collections::BTreeMap;

    fn model(source: &str) -> Result<DesiredStateSet, ModelError> {
        let tree = parse(source, &BTreeMap::new()).unwrap();
        let validated = validate(tree, &Schema::builtin()).unwrap();
        build(&validated)
    }

    fn ids(set: &DesiredStateSet) -> Vec<String> {
        set.declarations().iter().map(|d| d.id.to_string()).collect()
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_lowering_follows_file_order() {
        let set = model(
            r#"
            networking.hostName = "box";
            environment.systemPackages = [ "git" "neovim@0.10.2" ];
            environment.variables.EDITOR = "nvim";
            environment.shellAliases.ll = "ls -l";
            environment.etc."motd".text = "welcome\n";
            boot.loader.systemd-boot.enable = true;
            "#,
        )
        .unwrap();
        assert_eq!(
            ids(&set),
            [
                "file:/etc/hostname",
                "package:git",
                "package:neovim",
                "env:EDITOR",
                "alias:ll",
                "file:/etc/motd",
            ]
        );
        assert_eq!(
            set.get(&id("package:neovim")).map(|d| &d.value),
            Some(&ResourceValue::Package {
                version: Some("0.10.2".into())
            })
        );
        assert_eq!(
            set.get(&id("file:/etc/hostname")).map(|d| &d.value),
            Some(&ResourceValue::FileContent {
                content: "box\n".into(),
                mode: "0644".into(),
            })
        );
    }

    #[test]
    fn test_etc_mode_is_normalized() {
        let set = model(
            r#"
            environment.etc."a".text = "x";
            environment.etc."b" = { text = "y"; mode = "644"; };
            environment.etc."c" = { text = "z"; mode = "600"; };
            "#,
        )
        .unwrap();
        let mode = |path: &str| match &set.get(&id(path)).unwrap().value {
            ResourceValue::FileContent { mode, .. } => mode.clone(),
            other => panic!("expected a file, got {other:?}"),
        };
        assert_eq!(mode("file:/etc/a"), "0644");
        assert_eq!(mode("file:/etc/b"), "0644");
        assert_eq!(mode("file:/etc/c"), "0600");
    }

    #[test]
    fn test_user_defaults() {
        let set = model(
            r#"
            users.users.chris.extraGroups = [ "wheel" "audio" "wheel" ];
            users.users.daemon.isNormalUser = false;
            "#,
        )
        .unwrap();
        assert_eq!(
            set.get(&id("user:chris")).map(|d| &d.value),
            Some(&ResourceValue::User {
                home: "/home/chris".into(),
                shell: None,
                groups: vec!["audio".into(), "wheel".into()],
                normal: true,
            })
        );
        let ResourceValue::User { home, .. } = &set.get(&id("user:daemon")).unwrap().value else {
            panic!("expected a user");
        };
        assert_eq!(home, "/var/empty");
    }

    #[test]
    fn test_disabled_service_not_declared() {
        let set = model(
            r#"
            services.ssh.enable = true;
            services.cups.enable = false;
            services.avahi.settings.x = 1;
            "#,
        )
        .unwrap();
        assert_eq!(ids(&set), ["service:ssh"]);
    }

    #[test]
    fn test_conflicting_aliases() {
        let err = model(
            r#"
            environment.shellAliases.ll = "ls -l";
            programs.bash.shellAliases.ll = "ls -la";
            "#,
        )
        .unwrap_err();
        let ModelError::Conflict(conflict) = err else {
            panic!("expected a conflict, got {err:?}");
        };
        assert_eq!(conflict.key, id("alias:ll"));
        assert_eq!(conflict.site_a, "environment.shellAliases.ll");
        assert_eq!(conflict.site_b, "programs.bash.shellAliases.ll");
        assert_eq!(conflict.value_a, "command=ls -l");
    }

    #[test]
    fn test_identical_redeclaration_collapses() {
        let set = model(
            r#"
            environment.systemPackages = [ "git" ];
            users.users.chris.packages = [ "git" ];
            environment.shellAliases.ll = "ls -l";
            programs.bash.shellAliases.ll = "ls -l";
            "#,
        )
        .unwrap();
        assert_eq!(ids(&set), ["package:git", "alias:ll", "user:chris"]);
    }

    #[test]
    fn test_hostname_conflicts_with_etc_file() {
        let err = model(
            r#"
            networking.hostName = "box";
            environment.etc.hostname.text = "other\n";
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Conflict(_)));
    }

    #[test]
    fn test_implicit_dependencies() {
        let set = model(
            r#"
            services.ssh = {
              enable = true;
              user = "sshd";
              package = "openssh";
            };
            users.users.sshd.isNormalUser = false;
            users.users.chris.shell = "/run/current-system/sw/bin/zsh";
            environment.systemPackages = [ "openssh" ];
            "#,
        )
        .unwrap();
        assert_eq!(
            set.get(&id("service:ssh")).unwrap().requires,
            vec![id("user:sshd"), id("package:openssh")]
        );
        // zsh is not declared, so no edge
        assert!(set.get(&id("user:chris")).unwrap().requires.is_empty());
    }

    #[test]
    fn test_shell_requires_declared_package() {
        let set = model(
            r#"
            users.users.chris.shell = "/bin/zsh";
            environment.systemPackages = [ "zsh" ];
            "#,
        )
        .unwrap();
        assert_eq!(
            set.get(&id("user:chris")).unwrap().requires,
            vec![id("package:zsh")]
        );
        assert_eq!(set.apply_order().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_explicit_requires_errors() {
        let err = model(r#"services.ssh = { enable = true; requires = [ "sshd" ]; };"#).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidReference {
                path: "services.ssh.requires".into(),
                value: "sshd".into(),
            }
        );

        let err =
            model(r#"services.ssh = { enable = true; requires = [ "user:nobody" ]; };"#).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownDependency {
                from: id("service:ssh"),
                to: id("user:nobody"),
            }
        );
    }

    #[test]
    fn test_requires_cycle_fails_build() {
        let err = model(
            r#"
            services.a = { enable = true; requires = [ "service:b" ]; };
            services.b = { enable = true; requires = [ "service:a" ]; };
            "#,
        )
        .unwrap_err();
        let ModelError::Cycle(PlanError::Cycle { cycle }) = err else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle, vec![id("service:a"), id("service:b")]);
    }

    #[test]
    fn test_exclusive_kinds() {
        let set = model(r#"converge.exclusive = [ "package" "alias" ];"#).unwrap();
        assert!(set.is_exclusive(ResourceKind::Package));
        assert!(!set.is_exclusive(ResourceKind::Service));
        assert_eq!(
            set.kinds(),
            BTreeSet::from([ResourceKind::Package, ResourceKind::Alias])
        );
    }

    #[test]
    fn test_service_settings_hash() {
        let a = model(r#"services.ssh = { enable = true; settings = { Port = 22; X = "y"; }; };"#)
            .unwrap();
        let b = model(r#"services.ssh = { enable = true; settings = { X = "y"; Port = 22; }; };"#)
            .unwrap();
        let hash = |set: &DesiredStateSet| set.get(&id("service:ssh")).unwrap().value.clone();
        assert_eq!(hash(&a), hash(&b));
    }
}
