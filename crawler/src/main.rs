use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use sha1::{Digest, Sha1};
use sitesearch_core::{html, ConnectionSettings};
use sitesearch_crawler::{RunFlag, SiteCrawler};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl one site root and write its pages as JSON lines")]
struct Cli {
    /// Site root; only links starting with this prefix are followed
    #[arg(long)]
    root: String,
    /// Output JSONL file path
    #[arg(long, default_value = "./data/crawl.jsonl")]
    output: String,
    /// Maximum concurrent fetches (defaults to available parallelism)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
    /// User-Agent header
    #[arg(long, default_value = "SiteSearchBot/0.1")]
    user_agent: String,
    /// Referer header
    #[arg(long, default_value = "https://www.google.com")]
    referer: String,
}

#[derive(Serialize)]
struct OutPage<'a> {
    id: String,
    path: &'a str,
    code: u16,
    title: String,
    timestamp: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    if let Some(dir) = std::path::Path::new(&args.output).parent() {
        fs::create_dir_all(dir).ok();
    }

    let settings = ConnectionSettings {
        user_agent: args.user_agent,
        referer: args.referer,
        timeout_ms: args.timeout_ms,
    };
    let concurrency = args
        .concurrency
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));
    let crawler = SiteCrawler::new(args.root.clone(), &settings, RunFlag::running(), Arc::new(Semaphore::new(concurrency)))?;
    info!(root = %args.root, concurrency, output = %args.output, "crawl starting");

    let pages = crawler.crawl().await;

    let mut out = BufWriter::new(File::create(&args.output).with_context(|| format!("creating {}", args.output))?);
    for page in &pages {
        let mut hasher = Sha1::new();
        hasher.update(page.path.as_bytes());
        let rec = OutPage {
            id: format!("{:x}", hasher.finalize()),
            path: &page.path,
            code: page.code,
            title: html::title(&page.content),
            timestamp: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        serde_json::to_writer(&mut out, &rec)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    let failed = pages.iter().filter(|p| p.is_error()).count();
    info!(pages = pages.len(), failed, output = %args.output, "done");
    Ok(())
}
