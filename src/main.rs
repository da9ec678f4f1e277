use chrono::Local;
use stackharvest::{config::Config, info_time, process::Harvester, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let start_time = Local::now();
    let config = Config::from_env()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let queries = if args.is_empty() {
        config.queries.clone()
    } else {
        args
    };

    let report = Harvester::from_config(&config).run(&queries).await?;
    for query in &report.queries {
        for phase in query.phases() {
            info!(
                query = %query.query,
                artifact = ?phase.artifact,
                collected = phase.collected,
                failed_units = phase.failed_units,
                degraded_units = phase.degraded_units,
                "phase summary"
            );
        }
    }
    if report.has_errors() {
        error!("Run finished with errors, see log above");
    }
    info_time!(start_time, "Full program time:");

    Ok(())
}
