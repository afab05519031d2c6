pub mod export;
pub mod git_sync;
pub mod hook;
pub mod migrate;
pub mod start;

use recall_runtime::Settings;

pub fn mcp_serve(settings: Settings, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(settings.worker.port);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::mcp::run_server(format!("http://127.0.0.1:{port}")))
}
