use super::dto::{GetObservationsArgs, SearchArgs, TimelineArgs};
use serde_json::Value;

// Thin wrappers over the worker's HTTP reads. The MCP process holds no state
// of its own; if the worker is down the tools report that instead of
// guessing.

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| format!("worker unreachable ({}): start it with `recall start`", err))?;
    if !response.status().is_success() {
        return Err(format!("worker returned {}", response.status()));
    }
    response
        .json()
        .await
        .map_err(|err| format!("malformed worker response: {}", err))
}

pub async fn handle_search(
    client: &reqwest::Client,
    base_url: &str,
    args: SearchArgs,
) -> Result<Value, String> {
    let mut url = format!(
        "{}/search?q={}&limit={}",
        base_url,
        urlencode(&args.query),
        args.limit.unwrap_or(10)
    );
    if let Some(project) = &args.project {
        url.push_str(&format!("&project={}", urlencode(project)));
    }
    if let Some(doc_type) = &args.doc_type {
        url.push_str(&format!("&doc_type={}", urlencode(doc_type)));
    }
    if let Some(session) = &args.session {
        url.push_str(&format!("&session={}", urlencode(session)));
    }
    get_json(client, &url).await
}

pub async fn handle_timeline(
    client: &reqwest::Client,
    base_url: &str,
    args: TimelineArgs,
) -> Result<Value, String> {
    let url = format!(
        "{}/timeline?anchor={}&radius={}",
        base_url,
        args.anchor,
        args.radius.unwrap_or(5)
    );
    get_json(client, &url).await
}

pub async fn handle_get_observations(
    client: &reqwest::Client,
    base_url: &str,
    args: GetObservationsArgs,
) -> Result<Value, String> {
    let ids = args
        .ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let url = format!("{}/observations/{}", base_url, ids);
    get_json(client, &url).await
}

/// Percent-encode the characters that would break a query string. The query
/// text is the only free-form input that crosses this boundary.
fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}
