use timeseries_api::{api, config::Config, logging, metrics};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logger(config.log_format) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    metrics::init_metrics();
    tracing::info!(
        port = config.port,
        db_path = ?config.db_path,
        cache_enabled = config.cache_enabled,
        "starting timeseries-api"
    );

    if let Err(e) = api::serve(config).await {
        tracing::error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}
