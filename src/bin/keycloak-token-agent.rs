use clap::arg;
use clap::command;
use clap::Parser;
use keycloak_token_agent::observability::service_resources_metrics::collect_process_metrics;
use keycloak_token_agent::server;
use keycloak_token_agent::utils::config_loader;
use keycloak_token_agent::utils::logging;
use anyhow::{anyhow, Result};
use keycloak_token_agent::utils::logging::LogLevel;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "keycloak-token-agent.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL" , value_enum)]
    log_level: Option<LogLevel>,
    /// Fetch one token for the named identity, print it as JSON and exit
    #[arg(long, value_name = "IDENTITY")]
    print: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config
    // -------------------------------

    let args = Args::parse();
    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level)?;

    // -------------------------------
    // 2. Register identities and build the token cache
    // -------------------------------

    let (cache, identities) = config_loader::build_token_cache(&service_config)?;

    // -------------------------------
    // 3. One-shot mode
    // -------------------------------

    if let Some(name) = args.print {
        let identity = identities
            .get(&name)
            .ok_or_else(|| anyhow!("identity '{}' is not configured", name))?;
        let token = cache.get_token(identity, false).await?;
        println!("{}", serde_json::to_string(&token)?);
        return Ok(());
    }

    // -------------------------------
    // 4. Start http server serving tokens and metrics
    // -------------------------------

    let http_server = server::server::start(&service_config.settings, cache, identities);

    // -------------------------------
    // 5. Start scraping system resources consumption metrics
    // -------------------------------

    let service_metrics = collect_process_metrics(service_config.settings.metrics.is_enabled);
    info!("Service starting...");
    tokio::try_join!(http_server, service_metrics)?;

    Ok(())
}
