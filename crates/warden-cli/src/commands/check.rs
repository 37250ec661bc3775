use std::path::Path;
use std::time::Duration;

use warden_eval::attribute::AttributeBroker;
use warden_eval::config::PdpConfig;
use warden_eval::function_broker::FunctionBroker;
use warden_eval::pdp::Pdp;

pub fn cmd_check(dir: &Path) -> Result<(), String> {
    let config = PdpConfig::load_dir(dir).map_err(|e| e.to_string())?;

    Pdp::compile(&config, FunctionBroker::with_stdlib(), AttributeBroker::new(), Duration::from_secs(5), Duration::ZERO, false)
        .map_err(|e| format!("compile error: {}", e))?;

    println!("{}: {} document(s) compiled under '{}'", config.pdp_id, config.policies.len(), config.configuration_id);
    Ok(())
}
