use clap::Args;
use serde::Serialize;

use shipyard::host;
use shipyard::paths;
use shipyard::utils::io;
use shipyard::Error;

use super::CmdResult;

#[derive(Args)]
pub struct ProvisionArgs {}

#[derive(Serialize)]
pub struct ToolStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Serialize)]
pub struct ProvisionOutput {
    pub config_dir: String,
    pub tools: Vec<ToolStatus>,
    pub directories: Vec<String>,
}

pub fn run(_args: ProvisionArgs, global: &super::GlobalArgs) -> CmdResult<ProvisionOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;

    let tools: Vec<ToolStatus> = ctx
        .settings
        .required_tools
        .iter()
        .map(|name| ToolStatus {
            name: name.clone(),
            path: host::which(name).map(|p| p.display().to_string()),
        })
        .collect();

    let missing: Vec<&str> = tools
        .iter()
        .filter(|t| t.path.is_none())
        .map(|t| t.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(Error::dependency_missing_tool(missing.join(", "), "provision"));
    }

    let settings = &ctx.settings;
    let dirs = [
        settings.apps_root.clone(),
        settings.backup_root.clone(),
        settings.report_dir.clone(),
        paths::locks(&settings.state_dir),
        paths::app_configs(ctx.store.dir()),
    ];
    for dir in &dirs {
        io::ensure_dir(dir, "provision directory")?;
    }
    shipyard::log_status!("provision", "Host ready ({} tools found)", tools.len());

    Ok((
        ProvisionOutput {
            config_dir: ctx.store.dir().display().to_string(),
            tools,
            directories: dirs.iter().map(|d| d.display().to_string()).collect(),
        },
        0,
    ))
}
