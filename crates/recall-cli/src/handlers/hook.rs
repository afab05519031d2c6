use recall_runtime::Settings;
use serde_json::{Value, json};
use std::io::Read;
use std::time::Duration;

/// Forward one hook event to the worker. This path must never disrupt the
/// host: whatever goes wrong is written to stderr and the exit code stays 0.
pub fn run(
    settings: Settings,
    platform: &str,
    event: &str,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("hook: failed to read stdin: {}", err);
        return Ok(());
    }
    let payload: Value = serde_json::from_str(&input).unwrap_or_else(|_| json!({}));

    let port = port.unwrap_or(settings.worker.port);
    let url = format!("http://127.0.0.1:{port}/hooks/{platform}/{event}");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("hook: no runtime: {}", err);
            return Ok(());
        }
    };

    let result = runtime.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let response = client.post(&url).json(&payload).send().await?;
        anyhow::Ok(response.text().await?)
    });

    match result {
        Ok(body) => println!("{}", body),
        Err(err) => eprintln!("hook: worker unreachable at {}: {}", url, err),
    }
    Ok(())
}
