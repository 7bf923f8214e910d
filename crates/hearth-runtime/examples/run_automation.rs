//! Minimal end-to-end run: parse an automation, execute it through the
//! worker pool against a local control API, print the summary.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example run_automation
//! ```

use std::sync::Arc;

use serde_json::json;

use hearth_client::RestGateway;
use hearth_config::HearthConfig;
use hearth_core::parser::parse_automation_yaml;
use hearth_runtime::{ActionExecutor, ExecutorConfig};

const AUTOMATION: &str = r#"
actions:
  - delay: "00:00:01"
  - action: light.turn_on
    target:
      entity_id: light.kitchen
    data:
      brightness: 180
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = HearthConfig::default();
    let gateway = Arc::new(RestGateway::from_settings(&config.gateway));
    let executor =
        ActionExecutor::new(gateway).with_config(ExecutorConfig::from(&config.executor));

    let actions = parse_automation_yaml(AUTOMATION)?;
    let summary = executor
        .execute_actions(actions, json!({"user": "demo"}))
        .await;

    println!(
        "executed {} action(s): {} succeeded, {} failed in {:.1} ms",
        summary.total_actions, summary.successful, summary.failed, summary.total_time_ms
    );
    for error in &summary.errors {
        println!("  error: {}", error);
    }

    executor.shutdown().await;
    Ok(())
}
