//! Per-requirement install state machine
//!
//! `pending -> installing -> {installed | retrying -> installing | failed}`.
//! `installed` and `failed` are terminal.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Pending,
    Installing,
    Retrying,
    Installed,
    Failed,
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Installed | InstallState::Failed)
    }

    fn can_move_to(&self, next: InstallState) -> bool {
        use InstallState::*;
        matches!(
            (self, next),
            (Pending, Installing)
                | (Installing, Installed)
                | (Installing, Retrying)
                | (Installing, Failed)
                | (Retrying, Installing)
        )
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstallState::Pending => "pending",
            InstallState::Installing => "installing",
            InstallState::Retrying => "retrying",
            InstallState::Installed => "installed",
            InstallState::Failed => "failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid install transition for '{package}': {from} -> {to}")]
pub struct InvalidTransition {
    pub package: String,
    pub from: InstallState,
    pub to: InstallState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: InstallState,
    pub to: InstallState,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstallTracker {
    package: String,
    state: InstallState,
    attempt: u32,
    transitions: Vec<Transition>,
}

impl InstallTracker {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            state: InstallState::Pending,
            attempt: 0,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<Transition> {
        self.transitions
    }

    fn move_to(&mut self, next: InstallState, note: Option<String>) -> Result<(), InvalidTransition> {
        if !self.state.can_move_to(next) {
            return Err(InvalidTransition {
                package: self.package.clone(),
                from: self.state,
                to: next,
            });
        }
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            attempt: self.attempt,
            note,
        });
        self.state = next;
        Ok(())
    }

    /// Starts the next attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> Result<u32, InvalidTransition> {
        self.attempt += 1;
        if let Err(e) = self.move_to(InstallState::Installing, None) {
            self.attempt -= 1;
            return Err(e);
        }
        Ok(self.attempt)
    }

    pub fn succeed(&mut self, version: &str) -> Result<(), InvalidTransition> {
        self.move_to(InstallState::Installed, Some(version.to_string()))
    }

    pub fn schedule_retry(&mut self, reason: &str) -> Result<(), InvalidTransition> {
        self.move_to(InstallState::Retrying, Some(reason.to_string()))
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), InvalidTransition> {
        self.move_to(InstallState::Failed, Some(reason.to_string()))
    }
}
