use clap::Args;
use serde::Serialize;

use shipyard::host::{self, ServerInfo};

use super::CmdResult;

#[derive(Args)]
pub struct VersionArgs {}

#[derive(Serialize)]
pub struct VersionOutput {
    pub version: String,
    pub server_info: ServerInfo,
}

pub fn run(_args: VersionArgs, _global: &super::GlobalArgs) -> CmdResult<VersionOutput> {
    Ok((
        VersionOutput {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server_info: host::server_info(),
        },
        0,
    ))
}
