pub mod apply;
pub mod check;
pub mod options;
pub mod plan;
pub mod status;

use anyhow::{Context as _, Result};
use declarative::{EnvSource, EnvTable, ProbeOptions, Reconciler, Schema, ValidationWarning};
use std::fs;
use std::path::PathBuf;

use crate::Context;
use crate::config::Config;
use crate::system::{self, ProcessEnv};
use crate::{paths, ui};

/// Everything a command needs, resolved from flags and `config.toml`
pub struct Session {
    pub config: Config,
    pub declaration: PathBuf,
    pub state_dir: PathBuf,
    pub reconciler: Reconciler,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config = Config::load(ctx.config.as_deref())?;
        let config_dir = paths::config_dir()?;
        let state_dir = config.state_dir()?;
        let declaration = config.declaration_path(ctx.file.as_deref())?;
        log::debug!("declaration: {}", declaration.display());

        let backends = system::backends(&config, &config_dir, &state_dir);
        let reconciler = Reconciler::new(Schema::builtin(), backends)
            .with_probe_options(ProbeOptions {
                timeout: config.probe_timeout(),
            })
            .with_exclusive(config.exclusive_kinds()?);

        Ok(Self {
            config,
            declaration,
            state_dir,
            reconciler,
        })
    }

    pub fn read_declaration(&self) -> Result<String> {
        fs::read_to_string(&self.declaration)
            .with_context(|| format!("Could not read declaration {}", self.declaration.display()))
    }

    pub fn env(&self) -> Result<EnvTable> {
        ProcessEnv.read_all()
    }
}

pub fn print_warnings(ctx: &Context, warnings: &[ValidationWarning]) {
    if ctx.quiet {
        return;
    }
    for warning in warnings {
        ui::warn(&warning.to_string());
    }
}
