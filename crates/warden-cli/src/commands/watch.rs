use std::path::Path;
use std::time::Duration;

use warden_eval::attribute::AttributeBroker;
use warden_eval::config::PdpConfig;
use warden_eval::function_broker::FunctionBroker;
use warden_eval::pdp::Pdp;

use super::decide::read_subscription;

/// Streams successive decisions until the process is interrupted (Ctrl-C).
pub async fn cmd_watch(dir: &Path, subscription_path: &Path) -> Result<(), String> {
    let config = PdpConfig::load_dir(dir).map_err(|e| e.to_string())?;
    let pdp = Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(5), Duration::ZERO, false)
        .map_err(|e| format!("compile error: {}", e))?;

    let subscription = read_subscription(subscription_path)?;
    let mut subscribed = pdp.subscribe(subscription);

    loop {
        tokio::select! {
            decision = subscribed.decisions.next() => {
                match decision {
                    Some(d) => println!("{}", serde_json::to_string_pretty(&d.to_json()).map_err(|e| e.to_string())?),
                    None => return Ok(()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}
