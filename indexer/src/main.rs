use anyhow::Result;
use clap::{Parser, Subcommand};
use sitesearch_core::{AppConfig, Store};
use sitesearch_indexer::IndexingService;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Crawl configured sites into the lemma index", long_about = None)]
struct Cli {
    /// YAML configuration with the site list
    #[arg(long, default_value = "config.yaml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every configured site; Ctrl-C stops the run and keeps what was fetched
    Run,
    /// Re-index a single page of a configured site
    Page {
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let store = Store::open(&config.data_dir)?;
    let service = IndexingService::new(config, store)?;

    let response = match cli.command {
        Commands::Run => {
            let started = service.start();
            if started.result {
                tokio::select! {
                    _ = service.wait_idle() => {}
                    _ = tokio::signal::ctrl_c() => {
                        service.stop();
                        service.wait_idle().await;
                    }
                }
            }
            started
        }
        Commands::Page { url } => service.index_page(&url).await,
    };
    service.store().flush()?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
