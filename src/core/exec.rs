//! Running an application's command templates.
//!
//! Every external step of a deployment goes through [`run_step`], which
//! renders the `{{var}}` template for the application, enforces the stage
//! deadline and cancellation, and maps the outcome onto the error taxonomy.
//! Rendered commands may contain credentials and are never logged.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::CancelToken;
use crate::registry::Application;
use crate::utils::command::{CommandOutput, ShellCommand};
use crate::utils::shell;
use crate::utils::template::{self, TemplateVars};

/// Deadline and cancellation shared by every command of one stage.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub deadline: Option<Instant>,
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl RunLimits {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            timeout,
            cancel,
        }
    }

    /// No deadline; used by one-shot commands outside the pipeline.
    pub fn unbounded(cancel: CancelToken) -> Self {
        Self {
            deadline: None,
            timeout: Duration::ZERO,
            cancel,
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

pub fn template_vars(app: &Application, work_dir: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let mut put = |k: &str, v: String| {
        vars.insert(k.to_string(), v);
    };
    put(TemplateVars::APP_NAME, app.name.clone());
    put(TemplateVars::APP_PATH, app.root_path.display().to_string());
    put(TemplateVars::WORK_DIR, work_dir.display().to_string());
    put(TemplateVars::LIVE_DIR, app.live_dir().display().to_string());
    put(TemplateVars::DOMAIN, app.domain.clone());
    put(TemplateVars::RUNTIME_VERSION, app.runtime_version.clone());
    put(TemplateVars::BRANCH, shell::quote_arg(&app.branch));
    put(
        TemplateVars::REPO_URL,
        shell::quote_arg(app.repo_url.as_deref().unwrap_or_default()),
    );
    put(TemplateVars::DB_NAME, app.database.name.clone());
    put(TemplateVars::DB_USER, app.database.user.clone());
    put(
        TemplateVars::DB_PASSWORD,
        app.database
            .password
            .as_ref()
            .map(|s| s.expose().to_string())
            .unwrap_or_default(),
    );
    put(TemplateVars::SSL_EMAIL, app.config.get_or_empty("SSL_EMAIL"));
    vars
}

/// Render the command template stored under `key`. `None` when disabled.
pub fn render_command(
    app: &Application,
    key: &str,
    work_dir: &Path,
    extra: &[(&str, String)],
) -> Option<String> {
    let raw = app.config.command(key)?;
    let mut vars = template_vars(app, work_dir);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.clone());
    }
    Some(template::render_map(&raw, &vars))
}

/// Build a command with the step's limits applied.
pub fn command(rendered: &str, work_dir: &Path, limits: &RunLimits) -> ShellCommand {
    ShellCommand::new(rendered)
        .current_dir(work_dir)
        .env("COMPOSER_NO_INTERACTION", "1")
        .deadline(limits.deadline)
        .cancel_token(&limits.cancel)
}

/// Run a rendered command and convert failure into a typed error.
pub fn run_step(
    app: &Application,
    step: &str,
    rendered: &str,
    work_dir: &Path,
    limits: &RunLimits,
) -> Result<CommandOutput> {
    tracing::debug!(app = %app.name, step, dir = %work_dir.display(), "Running step command");
    let output = command(rendered, work_dir, limits).run()?;
    check_output(app, step, rendered, output, limits)
}

pub fn check_output(
    app: &Application,
    step: &str,
    rendered: &str,
    output: CommandOutput,
    limits: &RunLimits,
) -> Result<CommandOutput> {
    if output.success {
        return Ok(output);
    }
    if output.timed_out {
        return Err(Error::stage_timeout(&app.name, step, limits.timeout.as_secs()));
    }
    if output.interrupted {
        return Err(Error::interrupted(&app.name, step));
    }
    if output.command_not_found() {
        let tool = shell::program_name(rendered).unwrap_or("sh");
        return Err(Error::dependency_missing_tool(tool, step.to_string()));
    }
    Err(Error::stage_failed(
        &app.name,
        step,
        output.error_text(),
        Some(output.exit_code),
    ))
}

/// Render and run `key` if it is enabled. Returns `Ok(false)` when disabled.
pub fn run_configured(
    app: &Application,
    step: &str,
    key: &str,
    work_dir: &Path,
    limits: &RunLimits,
) -> Result<bool> {
    match render_command(app, key, work_dir, &[]) {
        Some(rendered) => {
            run_step(app, step, &rendered, work_dir, limits)?;
            Ok(true)
        }
        None => {
            tracing::debug!(app = %app.name, step, key, "Command disabled");
            Ok(false)
        }
    }
}
