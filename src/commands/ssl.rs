use clap::Args;
use serde::Serialize;

use shipyard::exec::{self, RunLimits};
use shipyard::interrupt::CancelToken;
use shipyard::output::BulkResult;
use shipyard::registry::Application;
use shipyard::{Error, Result};

use super::CmdResult;

#[derive(Args)]
pub struct SslArgs {
    /// Application to issue a certificate for (all SSL-enabled applications when omitted)
    pub app: Option<String>,
}

#[derive(Serialize)]
pub struct SslOutcome {
    pub domain: String,
}

fn issue(app: &Application, limits: &RunLimits) -> Result<SslOutcome> {
    if app.config.get_or_empty("SSL_EMAIL").is_empty() {
        return Err(Error::ssl_failed(&app.name, "SSL_EMAIL is not set"));
    }
    let rendered = exec::render_command(app, "SSL_COMMAND", &app.root_path, &[])
        .ok_or_else(|| Error::ssl_failed(&app.name, "SSL_COMMAND is not set"))?;

    exec::run_step(app, "ssl", &rendered, &app.root_path, limits)
        .map_err(|e| Error::ssl_failed(&app.name, e.describe()))?;
    shipyard::log_status!("ssl", "Certificate issued for {}", app.domain);
    Ok(SslOutcome {
        domain: app.domain.clone(),
    })
}

pub fn run(args: SslArgs, global: &super::GlobalArgs) -> CmdResult<BulkResult<SslOutcome>> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let named = args.app.is_some();
    let apps: Vec<Application> = ctx
        .applications(args.app.as_deref())?
        .into_iter()
        .filter(|app| named || app.flags.ssl)
        .collect();

    let cancel = CancelToken::new();
    let outcomes = apps
        .iter()
        .map(|app| {
            let limits = RunLimits::new(ctx.settings.stage_timeout, cancel.clone());
            (app.name.clone(), issue(app, &limits))
        })
        .collect();

    let bulk = BulkResult::collect("ssl", outcomes);
    let exit_code = bulk.exit_code();
    Ok((bulk, exit_code))
}
