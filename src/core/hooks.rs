//! Deployment hooks.
//!
//! Hooks are operator-supplied command templates that run at the edges of a
//! deployment: `pre:deploy` before anything is touched and `post:deploy`
//! after the new code is live. The application record overrides the global
//! record; an empty value disables the hook.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::exec::{self, RunLimits};
use crate::registry::Application;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreDeploy,
    PostDeploy,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreDeploy => "pre:deploy",
            HookEvent::PostDeploy => "post:deploy",
        }
    }

    pub fn config_key(&self) -> &'static str {
        match self {
            HookEvent::PreDeploy => "PRE_DEPLOY_HOOK",
            HookEvent::PostDeploy => "POST_DEPLOY_HOOK",
        }
    }

    /// A failing pre-deploy hook vetoes the deployment. Post-deploy hooks run
    /// against code that is already live, so their failures are recorded only.
    pub fn failure_mode(&self) -> HookFailureMode {
        match self {
            HookEvent::PreDeploy => HookFailureMode::Fatal,
            HookEvent::PostDeploy => HookFailureMode::NonFatal,
        }
    }
}

/// Result of running a single hook command.
#[derive(Debug, Clone, Serialize)]
pub struct HookCommandResult {
    /// The unrendered template; rendered commands may carry credentials.
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Result of running all hooks for an event.
#[derive(Debug, Clone, Serialize)]
pub struct HookRunResult {
    pub event: String,
    pub commands: Vec<HookCommandResult>,
    pub all_succeeded: bool,
}

impl HookRunResult {
    /// One line per failed command, for stage warnings.
    pub fn failures(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter(|c| !c.success)
            .map(|c| {
                format!(
                    "{} hook exited {}: {}",
                    self.event,
                    c.exit_code,
                    c.stderr.trim().lines().last().unwrap_or_default()
                )
            })
            .collect()
    }
}

/// Whether hook failures abort the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailureMode {
    /// Non-zero exit stops remaining hooks and returns an error.
    Fatal,
    /// Failures are recorded but execution continues.
    NonFatal,
}

/// Hook templates configured for `event`.
pub fn resolve_hooks(app: &Application, event: HookEvent) -> Vec<String> {
    app.config
        .command(event.config_key())
        .into_iter()
        .collect()
}

/// Run every hook for `event` in `work_dir`.
pub fn run_hooks(
    app: &Application,
    event: HookEvent,
    work_dir: &Path,
    limits: &RunLimits,
) -> Result<HookRunResult> {
    let commands = resolve_hooks(app, event);
    run_commands(app, &commands, work_dir, event, event.failure_mode(), limits)
}

/// Run a list of hook templates for `event`.
///
/// Timeouts and interrupts always abort, whatever the failure mode.
pub fn run_commands(
    app: &Application,
    commands: &[String],
    work_dir: &Path,
    event: HookEvent,
    failure_mode: HookFailureMode,
    limits: &RunLimits,
) -> Result<HookRunResult> {
    let vars = exec::template_vars(app, work_dir);
    let mut results = Vec::new();
    let mut all_succeeded = true;

    for command in commands {
        let rendered = crate::utils::template::render_map(command, &vars);
        let output = exec::command(&rendered, work_dir, limits).run()?;

        let result = HookCommandResult {
            command: command.clone(),
            success: output.success,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            exit_code: output.exit_code,
        };
        results.push(result);

        if !output.success {
            all_succeeded = false;
            if failure_mode == HookFailureMode::Fatal || output.timed_out || output.interrupted {
                exec::check_output(app, event.as_str(), &rendered, output, limits)?;
            } else {
                tracing::warn!(app = %app.name, event = event.as_str(), "Hook command failed");
            }
        }
    }

    Ok(HookRunResult {
        event: event.as_str().to_string(),
        commands: results,
        all_succeeded,
    })
}
