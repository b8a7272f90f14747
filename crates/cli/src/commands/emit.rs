use anyhow::{bail, Context};
use tlytics::{Event, Payload};
use tlytics_node::config::ClientConfig;
use tlytics_node::network::RemoteClient;

/// `--data` must be a JSON object; anything else is rejected up front.
pub fn parse_data(raw: Option<&str>) -> anyhow::Result<Payload> {
    let Some(raw) = raw else {
        return Ok(Payload::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw).context("--data is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--data must be a JSON object, got {}", other),
    }
}

/// Send a single event to a running node, bypassing any buffering.
pub async fn run(server: &str, key: &str, data: Option<&str>, token: Option<String>) -> anyhow::Result<()> {
    let payload = parse_data(data)?;

    let mut config = ClientConfig::new(server);
    if let Some(token) = token {
        config = config.with_auth_token(token);
    }
    let client = RemoteClient::connect(config)?;

    let sent = client.send_now(Event::new(key).with_data(payload)).await;
    client.stop().await;
    sent.with_context(|| format!("Failed to send event to {}", server))?;

    println!("Sent event {:?} to {}", key, server);
    Ok(())
}
