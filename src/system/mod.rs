//! Backends that touch the machine

pub mod files;
pub mod inventory;
pub mod packages;
pub mod shell;

use anyhow::Result;
use declarative::{Backends, EnvSource, EnvTable, Packages, Services};
use std::path::Path;

use crate::config::Config;
use files::Files;
use inventory::{INVENTORY_FILE, InventoryStore};
use packages::CommandPackages;
use shell::{ALIAS_FILE, ENV_FILE, ShellSnippet};

/// Variables of the running process
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn read_all(&self) -> Result<EnvTable> {
        Ok(std::env::vars().collect())
    }
}

/// Register a backend for every resource kind
pub fn backends(config: &Config, config_dir: &Path, state_dir: &Path) -> Backends {
    let inventory = InventoryStore::new(state_dir.join(INVENTORY_FILE));
    let mut backends = Backends::new();

    match &config.packages {
        Some(commands) => {
            log::debug!("packages: using command templates");
            backends.register(Packages(CommandPackages::new(commands.clone())));
        }
        None => {
            backends.register(Packages(inventory.clone()));
        }
    }

    backends
        .register(Services(inventory.clone()))
        .register(inventory.users())
        .register(Files::new(config.root()))
        .register(ShellSnippet::env(config_dir.join(ENV_FILE)))
        .register(ShellSnippet::aliases(config_dir.join(ALIAS_FILE)));
    backends
}
