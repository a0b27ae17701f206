use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use crawler::analyse::{measure_blocked_resources, print_report, FilterTally};
use log::debug;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Crawl output aggregator", long_about = None)]
struct Args {
    /// Filter types to report on
    #[arg(short = 'f', long, num_args = 1.., default_values_t = vec!["blocking".to_string(), "elemhide".to_string()])]
    filter_types: Vec<String>,
    /// Number of concurrent size measurements, defaults to twice the cpu count
    #[arg(short = 'w', long)]
    workers: Option<usize>,
    /// Crawl output directory to aggregate
    outdir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    for filter_type in &args.filter_types {
        if filter_type != "blocking" && filter_type != "elemhide" {
            return Err(anyhow!("unknown filter type {}", filter_type));
        }
    }

    let workers = args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8)
    });

    let tally = FilterTally::scan(&args.outdir)?;
    debug!(
        "measuring {} blocked resources with {} workers",
        tally.blocked_urls.len(),
        workers
    );

    let sizes = measure_blocked_resources(&tally.blocked_urls, workers).await;
    print_report(&tally, &sizes, &args.filter_types);

    Ok(())
}
