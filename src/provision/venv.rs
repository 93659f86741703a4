//! CPython `venv` + pip backend

use super::backend::{
    EnvironmentBackend, EnvironmentHandle, EnvironmentLayout, FailureKind, InstallError,
};
use crate::requirement::Requirement;
use crate::runtime::RuntimeVersion;
use crate::util::process::{run_with_timeout, CommandOutput, ProcessError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Variables that would let an install escape or bypass the environment.
const SCRUBBED_ENV: &[&str] = &["PYTHONPATH", "PYTHONHOME", "PIP_USER", "PIP_TARGET", "PIP_PREFIX"];

pub struct VenvBackend {
    timeout: Duration,
}

impl VenvBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn python_in(env_dir: &Path) -> PathBuf {
        if cfg!(windows) {
            env_dir.join("Scripts").join("python.exe")
        } else {
            env_dir.join("bin").join("python")
        }
    }

    /// `python -m pip <args>` confined to the environment.
    fn pip(env: &EnvironmentHandle) -> Command {
        let mut cmd = Command::new(&env.python);
        cmd.arg("-m").arg("pip");
        for var in SCRUBBED_ENV {
            cmd.env_remove(var);
        }
        cmd.env("VIRTUAL_ENV", &env.root)
            .env("PIP_REQUIRE_VIRTUALENV", "1")
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .env("PIP_NO_INPUT", "1")
            .env("PIP_CACHE_DIR", &env.cache_dir);
        cmd
    }

    async fn run(&self, cmd: Command) -> Result<CommandOutput, InstallError> {
        let output = run_with_timeout(cmd, self.timeout)
            .await
            .map_err(process_failure)?;
        if output.success() {
            Ok(output)
        } else {
            Err(InstallError::from_output(&output.combined()))
        }
    }

    async fn installed_version(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Option<String> {
        let mut cmd = Self::pip(env);
        cmd.arg("show").arg(requirement.name.as_str());
        let output = self.run(cmd).await.ok()?;
        parse_show_version(&output.stdout)
    }
}

/// Timeouts are transient; a missing executable is not.
fn process_failure(err: ProcessError) -> InstallError {
    match err {
        ProcessError::Timeout { .. } => InstallError::transient(err.to_string()),
        ProcessError::Spawn { .. } | ProcessError::Wait { .. } => {
            InstallError::new(FailureKind::Other, err.to_string())
        }
    }
}

fn parse_show_version(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl EnvironmentBackend for VenvBackend {
    fn name(&self) -> &str {
        "venv"
    }

    async fn create(
        &self,
        runtime: RuntimeVersion,
        interpreter: &Path,
        layout: &EnvironmentLayout,
    ) -> Result<EnvironmentHandle, InstallError> {
        for dir in [&layout.wheelhouse, &layout.cache_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| InstallError::new(FailureKind::Other, format!("{}: {}", dir.display(), e)))?;
        }

        let mut cmd = Command::new(interpreter);
        cmd.arg("-m").arg("venv").arg(&layout.env_dir);
        for var in SCRUBBED_ENV {
            cmd.env_remove(var);
        }
        self.run(cmd).await?;

        let python = Self::python_in(&layout.env_dir);
        if !python.exists() {
            return Err(InstallError::new(
                FailureKind::Other,
                format!("venv did not produce {}", python.display()),
            ));
        }
        info!(runtime = %runtime, env = %layout.env_dir.display(), "Created virtual environment");

        Ok(EnvironmentHandle::new(
            runtime,
            layout.env_dir.clone(),
            python,
            layout.wheelhouse.clone(),
            layout.cache_dir.clone(),
        ))
    }

    async fn upgrade_build_tools(&self, env: &EnvironmentHandle) -> Result<(), InstallError> {
        let _guard = env.install_lock().lock().await;
        let mut cmd = Self::pip(env);
        cmd.args(["install", "--upgrade", "pip", "setuptools", "wheel"]);
        self.run(cmd).await.map(|_| ())
    }

    async fn download(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Result<(), InstallError> {
        let mut cmd = Self::pip(env);
        cmd.args(["download", "--no-deps", "--dest"])
            .arg(&env.wheelhouse)
            .arg(requirement.install_spec());
        self.run(cmd).await?;
        debug!(package = %requirement.name, "Downloaded into wheelhouse");
        Ok(())
    }

    async fn install(&self, env: &EnvironmentHandle, requirement: &Requirement) -> Result<String, InstallError> {
        let _guard = env.install_lock().lock().await;
        let mut cmd = Self::pip(env);
        cmd.args(["install", "--find-links"])
            .arg(&env.wheelhouse)
            .arg(requirement.install_spec());
        self.run(cmd).await?;

        Ok(self
            .installed_version(env, requirement)
            .await
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn install_project(&self, env: &EnvironmentHandle, project_dir: &Path) -> Result<(), InstallError> {
        let _guard = env.install_lock().lock().await;
        let mut cmd = Self::pip(env);
        cmd.args(["install", "--no-deps"]).arg(project_dir);
        cmd.current_dir(project_dir);
        self.run(cmd).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_show_version() {
        let stdout = "Name: numpy\nVersion: 1.26.4\nSummary: Fundamental package\n";
        assert_eq!(parse_show_version(stdout), Some("1.26.4".to_string()));
        assert_eq!(parse_show_version("Name: x\n"), None);
    }

    #[test]
    fn test_process_failure_mapping() {
        let timeout = ProcessError::Timeout {
            program: "pip".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(process_failure(timeout).kind, FailureKind::Transient);

        let spawn = ProcessError::Spawn {
            program: "pip".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(process_failure(spawn).kind, FailureKind::Other);
    }

    #[test]
    fn test_pip_command_is_isolated() {
        let env = EnvironmentHandle::new(
            RuntimeVersion::new(3, 11),
            PathBuf::from("/ws/env"),
            PathBuf::from("/ws/env/bin/python"),
            PathBuf::from("/ws/wheelhouse"),
            PathBuf::from("/ws/pip-cache"),
        );
        let cmd = VenvBackend::pip(&env);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/ws/env/bin/python");

        let envs: Vec<(String, Option<String>)> = std_cmd
            .get_envs()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.map(|v| v.to_string_lossy().into_owned()),
                )
            })
            .collect();
        assert!(envs.contains(&("PIP_REQUIRE_VIRTUALENV".to_string(), Some("1".to_string()))));
        assert!(envs.contains(&("PIP_CACHE_DIR".to_string(), Some("/ws/pip-cache".to_string()))));
        assert!(envs.contains(&("PYTHONPATH".to_string(), None)));
    }
}
