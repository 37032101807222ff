use clap::{Parser, Subcommand};
use http_ttl_cache::logger::{init_logger, log_fetch};
use http_ttl_cache::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use url::Url;

/// Fetch URLs through a TTL-bounded response cache
#[derive(Parser, Debug)]
#[command(name = "http-ttl-cache")]
#[command(version)]
struct Cli {
    /// Configuration file; overrides HTTP_TTL_CACHE_CONFIG
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a URL, serving from cache when the policy allows
    Fetch {
        url: Url,

        /// e.g. use-protocol-cache-policy, return-cache-data-dont-load
        #[arg(long, default_value = "use-protocol-cache-policy")]
        policy: CachePolicy,

        /// Write the body here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print memory and disk usage
    Size,
    /// Remove every cached response and TTL record
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    init_logger(&config.logging.filter);

    let root = config.cache.storage_root()?;
    let manager = NetworkCacheManager::open(config.cache.to_configuration()?, &root).await?;
    info!("Using cache root {:?}", root);

    match cli.command {
        Command::Fetch {
            url,
            policy,
            output,
        } => {
            let started = Instant::now();
            let body = match manager.fetch_bytes(&url, policy).await {
                Ok(body) => body,
                Err(e) => {
                    error!("Fetch failed (code {}): {}", e.error_code(), e);
                    return Err(e.into());
                }
            };
            log_fetch(url.as_str(), body.len(), started.elapsed());

            match output {
                Some(path) => tokio::fs::write(path, &body).await?,
                None => {
                    use tokio::io::AsyncWriteExt;
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&body).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Size => {
            let usage = manager.cache_size().await;
            println!("memory: {} bytes", usage.memory);
            println!("disk:   {} bytes", usage.disk);
        }
        Command::Clear => {
            manager.clear_cache().await;
            println!("cache cleared");
        }
    }

    Ok(())
}
