//! JSON inventory standing in for the package, service and account managers
//!
//! The file is re-read on every query and rewritten on every change, so
//! edits made between runs are picked up.

use anyhow::{Context, Result, bail};
use declarative::{
    AttributeNode, Backend, PackageManager, PackageStatus, ResourceDeclaration, ResourceKind,
    ResourceValue, ServiceManager, ServiceStatus, config_hash,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub const INVENTORY_FILE: &str = "inventory.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    /// Installed packages and their versions
    pub packages: BTreeMap<String, Option<String>>,
    pub services: BTreeMap<String, ServiceEntry>,
    pub users: BTreeMap<String, UserEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub active: bool,
    #[serde(default)]
    pub config_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub home: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_normal")]
    pub normal: bool,
}

fn default_normal() -> bool {
    true
}

/// Shared handle to the inventory file
///
/// Clones share one lock so read-modify-write cycles do not interleave.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl InventoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> Result<Inventory> {
        if !self.path.exists() {
            return Ok(Inventory::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read inventory: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse inventory: {}", self.path.display()))
    }

    fn write(&self, inventory: &Inventory) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(inventory)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write inventory: {}", self.path.display()))
    }

    pub fn load(&self) -> Result<Inventory> {
        let _guard = self.guard();
        self.read()
    }

    /// Read, change and write back under the lock
    pub fn update<T>(&self, f: impl FnOnce(&mut Inventory) -> T) -> Result<T> {
        let _guard = self.guard();
        let mut inventory = self.read()?;
        let result = f(&mut inventory);
        self.write(&inventory)?;
        Ok(result)
    }

    /// Backend for user accounts
    pub fn users(&self) -> Users {
        Users(self.clone())
    }
}

impl PackageManager for InventoryStore {
    fn query(&self, name: &str) -> Result<PackageStatus> {
        Ok(match self.load()?.packages.get(name) {
            Some(version) => PackageStatus {
                installed: true,
                version: version.clone(),
            },
            None => PackageStatus::default(),
        })
    }

    fn apply(&self, name: &str, version: Option<&str>) -> Result<()> {
        log::debug!("inventory: install {name}");
        self.update(|inv| {
            inv.packages
                .insert(name.to_string(), version.map(str::to_string));
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        log::debug!("inventory: remove {name}");
        self.update(|inv| {
            inv.packages.remove(name);
        })
    }

    fn installed(&self) -> Result<Vec<String>> {
        Ok(self.load()?.packages.into_keys().collect())
    }
}

impl ServiceManager for InventoryStore {
    fn query(&self, name: &str) -> Result<ServiceStatus> {
        Ok(match self.load()?.services.get(name) {
            Some(entry) => ServiceStatus {
                active: entry.active,
                config_hash: entry.config_hash.clone(),
            },
            None => ServiceStatus::default(),
        })
    }

    fn apply(&self, name: &str, config: &AttributeNode) -> Result<()> {
        let hash = config_hash(config);
        self.update(|inv| {
            inv.services.insert(
                name.to_string(),
                ServiceEntry {
                    active: true,
                    config_hash: hash,
                },
            );
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.update(|inv| {
            if let Some(entry) = inv.services.get_mut(name) {
                entry.active = false;
            }
        })
    }

    fn active(&self) -> Result<Vec<String>> {
        Ok(self
            .load()?
            .services
            .into_iter()
            .filter(|(_, entry)| entry.active)
            .map(|(name, _)| name)
            .collect())
    }
}

/// User accounts kept in the inventory
pub struct Users(InventoryStore);

impl Backend for Users {
    fn kind(&self) -> ResourceKind {
        ResourceKind::User
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        Ok(self.0.load()?.users.get(name).map(|u| ResourceValue::User {
            home: u.home.clone(),
            shell: u.shell.clone(),
            groups: u.groups.clone(),
            normal: u.normal,
        }))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.0.load()?.users.into_keys().collect())
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        let ResourceValue::User {
            home,
            shell,
            groups,
            normal,
        } = &declaration.value
        else {
            bail!("{} is not a user", declaration.id);
        };
        let entry = UserEntry {
            home: home.clone(),
            shell: shell.clone(),
            groups: groups.clone(),
            normal: *normal,
        };
        self.0.update(|inv| {
            inv.users.insert(declaration.id.name.clone(), entry);
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.0.update(|inv| {
            inv.users.remove(name);
        })
    }
}
