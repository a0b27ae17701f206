use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use clap::Parser;
use crawler::orchestrator::{Orchestrator, OrchestratorOptions};
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Filter list crawler", long_about = None)]
struct Args {
    /// Browser binary to run the crawl with
    #[arg(short = 'b', long)]
    binary: PathBuf,
    /// Directory containing the unpacked crawler extension
    #[arg(short = 'e', long)]
    extension: PathBuf,
    /// Directory containing an unpacked ad blocking add-on, downloaded when omitted
    #[arg(short = 'a', long)]
    companion: Option<PathBuf>,
    /// Filter list sources, either a url or path=url
    #[arg(short = 'f', long, num_args = 1.., value_name = "url")]
    filters: Option<Vec<String>>,
    /// Maximum time in seconds a page may take to load
    #[arg(short = 't', long, default_value_t = 300)]
    timeout: u64,
    /// Maximum number of tabs crawling at the same time
    #[arg(short = 'x', long, default_value_t = 15)]
    maxtabs: u32,
    /// File with one URL to crawl per line
    list: PathBuf,
    /// Directory the crawl artifacts are written to
    outdir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("starting crawl with {:#?}", args.clone());

    let mut builder = OrchestratorOptions::default_builder();
    builder
        .list(args.list)
        .outdir(args.outdir)
        .binary(args.binary)
        .extension_dir(args.extension)
        .companion_dir(args.companion)
        .timeout(args.timeout)
        .maxtabs(args.maxtabs);
    if let Some(filters) = args.filters {
        builder.filters(filters);
    }
    let options = builder.build()?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let mut orchestrator = Orchestrator::new(options).await?;
    orchestrator.run(should_terminate).await?;

    Ok(())
}
