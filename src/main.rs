//! Ruster Credit - stacking-ensemble risk scoring
//!
//! Usage:
//!   ruster_credit train <labeled.json>     fit + publish a new model version
//!   ruster_credit assess <entities.json>   score entities with the active version
//!   ruster_credit versions                 list published versions
//!
//! Configuration comes from `RUSTER_CONFIG` (JSON) or defaults;
//! `RUSTER_ARTIFACT_DIR` overrides where versions live.

use ruster_credit::utils::constants::{APP_NAME, APP_VERSION};
use ruster_credit::{EngineConfig, FeatureVector, RiskEngine};

use eyre::{eyre, Result, WrapErr};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn read_entities(path: &Path) -> Result<Vec<FeatureVector>> {
    let raw = std::fs::read_to_string(path).wrap_err_with(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw).wrap_err_with(|| format!("{} is not a JSON array of entities", path.display()))
}

fn usage() -> String {
    format!(
        "{} v{}\n\nUsage:\n  ruster_credit train <labeled.json>\n  ruster_credit assess <entities.json>\n  ruster_credit versions",
        APP_NAME, APP_VERSION
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG, default info)
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", usage());
        return Ok(());
    };

    let config = EngineConfig::load().map_err(|e| eyre!("{}", e))?;
    let engine = Arc::new(RiskEngine::with_lending_models(config).map_err(|e| eyre!("{}", e))?);

    match command.as_str() {
        "train" => {
            let path = args.get(1).ok_or_else(|| eyre!("missing <labeled.json>\n\n{}", usage()))?;
            let rows = read_entities(Path::new(path))?;
            let report = engine.clone().train_async(rows).await.map_err(|e| eyre!("{}", e))?;
            println!("{}", report.summary());
        }
        "assess" => {
            let path = args.get(1).ok_or_else(|| eyre!("missing <entities.json>\n\n{}", usage()))?;
            let entities = read_entities(Path::new(path))?;
            let results = engine.clone().assess_population(entities).await.map_err(|e| eyre!("{}", e))?;

            for result in results {
                match result {
                    Ok(report) => {
                        print!("{}", report.assessment.summary());
                        for rec in &report.recommendations {
                            println!("   [{}] {}", rec.impact.as_str(), rec.title);
                        }
                    }
                    Err(e) => eprintln!("❌ {}", e),
                }
            }

            let stats = engine.telemetry().get_stats();
            println!("{}", stats.summary());
            match engine.export_telemetry() {
                Ok(path) => println!("   ✅ Telemetry exported to: {}", path.display()),
                Err(e) => println!("   ❌ Telemetry export failed: {}", e),
            }
        }
        "versions" => {
            let versions = engine.registry().versions().map_err(|e| eyre!("{}", e))?;
            if versions.is_empty() {
                println!("📭 No published versions in {}", engine.config().artifact_dir.display());
            }
            let active = engine.active_version();
            for v in versions {
                let marker = if active.as_deref() == Some(v.as_str()) { "*" } else { " " };
                println!("{} {}", marker, v);
            }
        }
        other => {
            return Err(eyre!("unknown command '{}'\n\n{}", other, usage()));
        }
    }

    Ok(())
}
