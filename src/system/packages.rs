//! Package manager driven by command templates from `config.toml`

use anyhow::Result;
use declarative::{PackageManager, PackageStatus};

use crate::config::PackageCommands;
use crate::runner;

#[derive(Debug, Clone)]
pub struct CommandPackages {
    commands: PackageCommands,
}

impl CommandPackages {
    pub fn new(commands: PackageCommands) -> Self {
        Self { commands }
    }
}

impl PackageManager for CommandPackages {
    fn query(&self, name: &str) -> Result<PackageStatus> {
        let args = runner::render(&self.commands.query, &[("name", name)]);
        Ok(match runner::run_probe(&args)? {
            Some(version) => PackageStatus {
                installed: true,
                version: (!version.is_empty()).then_some(version),
            },
            None => PackageStatus::default(),
        })
    }

    fn apply(&self, name: &str, version: Option<&str>) -> Result<()> {
        let args = runner::render(
            &self.commands.install,
            &[("name", name), ("version", version.unwrap_or_default())],
        );
        log::info!("running {}", args.join(" "));
        runner::run_capture(&args).map(drop)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let args = runner::render(&self.commands.remove, &[("name", name)]);
        log::info!("running {}", args.join(" "));
        runner::run_capture(&args).map(drop)
    }

    fn installed(&self) -> Result<Vec<String>> {
        let Some(list) = &self.commands.list else {
            return Ok(Vec::new());
        };
        let output = runner::run_capture(&runner::render(list, &[]))?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn commands(query: &str) -> PackageCommands {
        PackageCommands {
            query: query.to_string(),
            list: Some("printf git\\nvim\\n".to_string()),
            install: "true {name} {version}".to_string(),
            remove: "true {name}".to_string(),
        }
    }

    #[test]
    fn test_query_reports_version_from_stdout() {
        let packages = CommandPackages::new(commands("echo 2.45"));
        assert_eq!(
            packages.query("git").unwrap(),
            PackageStatus {
                installed: true,
                version: Some("2.45".into())
            }
        );
    }

    #[test]
    fn test_failing_query_means_absent() {
        let packages = CommandPackages::new(commands("false {name}"));
        assert!(!packages.query("git").unwrap().installed);
    }

    #[test]
    fn test_empty_output_means_unknown_version() {
        let packages = CommandPackages::new(commands("true"));
        assert_eq!(packages.query("git").unwrap().version, None);
    }

    #[test]
    fn test_list_and_mutations() {
        let packages = CommandPackages::new(commands("true"));
        assert_eq!(packages.installed().unwrap(), ["git", "vim"]);
        packages.apply("git", Some("2.45")).unwrap();
        packages.remove("git").unwrap();
    }

    #[test]
    fn test_failed_install_is_error() {
        let mut failing = commands("true");
        failing.install = "false {name}".to_string();
        assert!(CommandPackages::new(failing).apply("git", None).is_err());
    }
}
