use chrono::Utc;
use clap::Args;
use serde::Serialize;

use shipyard::datastore::CommandDataStore;
use shipyard::interrupt::CancelToken;
use shipyard::pipeline::Pipeline;
use shipyard::report::RunReport;

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// Application to deploy (all applications when omitted)
    pub app: Option<String>,
}

#[derive(Serialize)]
pub struct DeployOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub report: RunReport,
}

pub fn run(args: DeployArgs, global: &super::GlobalArgs) -> CmdResult<DeployOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let apps = ctx.applications(args.app.as_deref())?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let datastore = CommandDataStore;
    let pipeline = Pipeline::new(
        &ctx.settings,
        &ctx.store,
        &datastore,
        CancelToken::new(),
        run_id.clone(),
    );

    let runs = pipeline.run_all(&apps);
    let report = RunReport::build(&run_id, started_at, &apps, &runs, &ctx.settings.state_dir);
    let report_path = report
        .write(&ctx.settings.report_dir)
        .map(|p| p.display().to_string());

    shipyard::log_status!(
        "deploy",
        "Run {} finished: {} succeeded, {} failed, {} pending",
        run_id,
        report.summary.successful,
        report.summary.failed,
        report.summary.pending
    );

    let exit_code = report.exit_code();
    Ok((
        DeployOutput {
            report_path,
            report,
        },
        exit_code,
    ))
}
