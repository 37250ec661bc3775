use std::fs;
use std::path::Path;
use std::time::Duration;

use warden_eval::attribute::AttributeBroker;
use warden_eval::config::PdpConfig;
use warden_eval::function_broker::FunctionBroker;
use warden_eval::pdp::Pdp;
use warden_eval::Subscription;

pub async fn cmd_decide(dir: &Path, subscription_path: &Path) -> Result<(), String> {
    let config = PdpConfig::load_dir(dir).map_err(|e| e.to_string())?;
    let pdp = Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(5), Duration::ZERO, false)
        .map_err(|e| format!("compile error: {}", e))?;

    let subscription = read_subscription(subscription_path)?;
    let mut subscribed = pdp.subscribe(subscription);

    let decision = subscribed.decisions.next().await.ok_or("decision flux closed with no emission")?;
    println!("{}", serde_json::to_string_pretty(&decision.to_json()).map_err(|e| e.to_string())?);
    Ok(())
}

pub(crate) fn read_subscription(path: &Path) -> Result<Subscription, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("reading '{}': {}", path.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&raw).map_err(|e| format!("parsing '{}': {}", path.display(), e))?;
    Ok(Subscription::from_json(&json))
}
