//! Runtime provisioning through the host's interpreter and package installer.
//!
//! Runtimes are virtual environments created with `<interpreter> -m venv`;
//! packages are managed with the runtime's own `pip`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::RuntimeProvisioner;
use crate::core::constraint::ConstraintAlgebra;
use crate::core::version::{ConstraintSet, Version};
use crate::error::ProvisionError;

/// Directory under the environment root holding the runtime.
pub const RUNTIME_DIR: &str = "runtime";

const VERSION_SNIPPET: &str = "import platform; print(platform.python_version())";

/// [`RuntimeProvisioner`] that shells out to interpreters found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    interpreters: Vec<String>,
    algebra: ConstraintAlgebra,
}

impl CommandProvisioner {
    /// `interpreters` are candidate programs, e.g. `["python3.12", "python3.11", "python3"]`.
    pub fn new(interpreters: Vec<String>) -> Self {
        Self {
            interpreters,
            algebra: ConstraintAlgebra::default(),
        }
    }

    /// Path of the runtime executable inside an environment root.
    pub fn runtime_executable(root: &Path) -> PathBuf {
        let dir = root.join(RUNTIME_DIR);
        if cfg!(windows) {
            dir.join("Scripts").join("python.exe")
        } else {
            dir.join("bin").join("python")
        }
    }

    /// Highest-versioned candidate interpreter satisfying `constraint`.
    pub fn find_interpreter(&self, constraint: &ConstraintSet) -> Result<(String, Version), ProvisionError> {
        let found: Vec<(String, Version)> = self
            .interpreters
            .iter()
            .filter_map(|program| match query_version(Path::new(program)) {
                Ok(version) => Some((program.clone(), version)),
                Err(e) => {
                    debug!(program, error = %e, "interpreter unavailable");
                    None
                }
            })
            .collect();

        let versions: Vec<Version> = found.iter().map(|(_, v)| v.clone()).collect();
        let best = self
            .algebra
            .select_best(constraint, &versions)
            .ok_or_else(|| ProvisionError::NoInterpreter(constraint.clone()))?;

        found
            .into_iter()
            .find(|(_, v)| v == best)
            .ok_or_else(|| ProvisionError::NoInterpreter(constraint.clone()))
    }
}

impl RuntimeProvisioner for CommandProvisioner {
    fn create_runtime(&self, root: &Path, constraint: &ConstraintSet) -> Result<PathBuf, ProvisionError> {
        let (program, version) = self.find_interpreter(constraint)?;
        info!(%program, %version, root = %root.display(), "creating runtime");

        let dir = root.join(RUNTIME_DIR);
        let mut cmd = Command::new(&program);
        cmd.arg("-m").arg("venv").arg(&dir);
        run(cmd)?;

        Ok(Self::runtime_executable(root))
    }

    fn delete_runtime(&self, root: &Path) -> Result<(), ProvisionError> {
        let dir = root.join(RUNTIME_DIR);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn install_artifacts(&self, runtime: &Path, locators: &[String], no_cache: bool) -> Result<(), ProvisionError> {
        if locators.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(runtime);
        cmd.args(["-m", "pip", "install", "--no-deps", "--disable-pip-version-check"]);
        if no_cache {
            cmd.arg("--no-cache-dir");
        }
        cmd.args(locators);
        run(cmd)
    }

    fn uninstall_packages(&self, runtime: &Path, names: &[String]) -> Result<(), ProvisionError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(runtime);
        cmd.args(["-m", "pip", "uninstall", "-y", "--disable-pip-version-check"]);
        cmd.args(names);
        run(cmd)
    }

    fn runtime_version(&self, runtime: &Path) -> Result<Version, ProvisionError> {
        query_version(runtime)
    }
}

fn query_version(program: &Path) -> Result<Version, ProvisionError> {
    let output = Command::new(program).args(["-c", VERSION_SNIPPET]).output()?;
    if !output.status.success() {
        return Err(ProvisionError::CommandFailed {
            cmd: format!("{} -c <version query>", program.display()),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    stdout
        .parse()
        .map_err(|_| ProvisionError::BadVersion(stdout.to_string()))
}

fn run(mut cmd: Command) -> Result<(), ProvisionError> {
    let rendered = format!("{:?}", cmd);
    debug!(cmd = %rendered, "running");
    let output = cmd.output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ProvisionError::CommandFailed {
            cmd: rendered,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_runtime_executable_layout() {
        let exe = CommandProvisioner::runtime_executable(Path::new("/envs/abc-default"));
        assert!(exe.starts_with("/envs/abc-default/runtime"));
        assert!(exe.to_string_lossy().contains("python"));
    }

    #[test]
    fn test_missing_interpreters_are_reported() {
        let provisioner = CommandProvisioner::new(vec!["definitely-not-a-python-binary".into()]);
        let constraint = ConstraintSet::parse(">=3.10").unwrap();
        let err = provisioner.find_interpreter(&constraint).unwrap_err();
        assert!(matches!(err, ProvisionError::NoInterpreter(_)));
        assert!(err.to_string().contains(">=3.10"));
    }

    #[test]
    fn test_delete_missing_runtime_is_ok() {
        let dir = TempDir::new().unwrap();
        let provisioner = CommandProvisioner::new(vec![]);
        assert!(provisioner.delete_runtime(dir.path()).is_ok());
    }

    #[test]
    fn test_delete_runtime_removes_only_runtime_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(RUNTIME_DIR).join("bin")).unwrap();
        std::fs::write(dir.path().join("env.toml"), "").unwrap();

        CommandProvisioner::new(vec![]).delete_runtime(dir.path()).unwrap();
        assert!(!dir.path().join(RUNTIME_DIR).exists());
        assert!(dir.path().join("env.toml").exists());
    }

    #[test]
    fn test_empty_install_and_uninstall_do_nothing() {
        let provisioner = CommandProvisioner::new(vec![]);
        let runtime = Path::new("/nonexistent/python");
        assert!(provisioner.install_artifacts(runtime, &[], false).is_ok());
        assert!(provisioner.uninstall_packages(runtime, &[]).is_ok());
    }
}
