use super::RuntimeVersion;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Finds the interpreter executable for a runtime series on this host.
pub trait InterpreterLocator: Send + Sync {
    fn locate(&self, runtime: RuntimeVersion) -> Option<PathBuf>;
}

/// Looks for `python3.X` on `PATH`, then asks pyenv for an installed prefix.
#[derive(Debug, Clone, Default)]
pub struct WhichLocator {
    use_pyenv: bool,
}

impl WhichLocator {
    pub fn new() -> Self {
        Self { use_pyenv: true }
    }

    pub fn without_pyenv() -> Self {
        Self { use_pyenv: false }
    }

    fn from_pyenv(runtime: RuntimeVersion) -> Option<PathBuf> {
        let output = Command::new("pyenv")
            .args(["prefix", &runtime.to_string()])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let prefix = String::from_utf8_lossy(&output.stdout);
        let prefix = prefix.lines().next()?.trim();
        let candidate = Path::new(prefix).join("bin").join(runtime.executable_name());
        candidate.is_file().then_some(candidate)
    }
}

impl InterpreterLocator for WhichLocator {
    fn locate(&self, runtime: RuntimeVersion) -> Option<PathBuf> {
        if let Ok(path) = which::which(runtime.executable_name()) {
            debug!(runtime = %runtime, path = %path.display(), "Interpreter found on PATH");
            return Some(path);
        }
        if self.use_pyenv {
            if let Some(path) = Self::from_pyenv(runtime) {
                debug!(runtime = %runtime, path = %path.display(), "Interpreter found via pyenv");
                return Some(path);
            }
        }
        None
    }
}

/// Fixed mapping, for explicit interpreter overrides and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    interpreters: BTreeMap<RuntimeVersion, PathBuf>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, runtime: RuntimeVersion, path: impl Into<PathBuf>) -> Self {
        self.interpreters.insert(runtime, path.into());
        self
    }
}

impl InterpreterLocator for StaticLocator {
    fn locate(&self, runtime: RuntimeVersion) -> Option<PathBuf> {
        self.interpreters.get(&runtime).cloned()
    }
}
