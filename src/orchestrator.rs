use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;

use crate::{
    artifacts::ArtifactStore,
    profile::{self, FilterSource, Profile},
    server::CallbackServer,
    session::{SessionLaunch, Supervisor},
    types::CrawlerError,
    worklist::Worklist,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct OrchestratorOptions {
    // file with one url per line
    pub list: PathBuf,
    // directory the crawl artifacts are written to
    pub outdir: PathBuf,
    // browser binary to launch
    pub binary: PathBuf,
    // unpacked source tree of the crawler extension
    pub extension_dir: PathBuf,
    // unpacked companion add-on, downloaded from AMO when unset
    #[builder(default)]
    pub companion_dir: Option<PathBuf>,
    // filter list sources, `url` or `path=url`
    #[builder(default = "self.default_filters()")]
    pub filters: Vec<String>,
    // per-page timeout in seconds
    #[builder(default = "300")]
    pub timeout: u64,
    // maximum number of tabs crawling concurrently
    #[builder(default = "15")]
    pub maxtabs: u32,
}

impl OrchestratorOptions {
    pub fn default_builder() -> OrchestratorOptionsBuilder {
        OrchestratorOptionsBuilder::default()
    }
}

impl OrchestratorOptionsBuilder {
    fn default_filters(&self) -> Vec<String> {
        profile::DEFAULT_FILTER_LISTS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Wires the pieces together: loads the worklist, builds the throwaway
/// profile, runs the callback server and keeps browser sessions coming
/// until every URL has been saved.
pub struct Orchestrator {
    options: OrchestratorOptions,
    worklist: Arc<Worklist>,
    store: Arc<ArtifactStore>,
    profile: Profile,
}

impl Orchestrator {
    pub async fn new(options: OrchestratorOptions) -> anyhow::Result<Self> {
        let worklist = Arc::new(Worklist::from_file(&options.list)?);
        info!("loaded {} urls from {:?}", worklist.len().await, options.list);

        let store = Arc::new(ArtifactStore::new(&options.outdir));

        let client = reqwest::Client::new();

        let crawler_xpi = profile::package_extension(&options.extension_dir)?;
        let companion_xpi = match &options.companion_dir {
            Some(dir) => profile::package_extension(dir)?,
            None => profile::fetch_companion_addon(&client).await?,
        };

        let filters = options
            .filters
            .iter()
            .map(|s| FilterSource::parse(s))
            .collect::<Vec<FilterSource>>();

        let profile = Profile::create(
            &[crawler_xpi.clone(), companion_xpi.clone()],
            &filters,
            &client,
        )
        .await;

        // the bundles are copied into the profile, the originals can go
        // even when profile creation failed
        for bundle in [&crawler_xpi, &companion_xpi] {
            if let Err(e) = std::fs::remove_file(bundle) {
                warn!("could not remove addon bundle {:?}: {}", bundle, e);
            }
        }
        let profile = profile?;

        Ok(Orchestrator {
            options,
            worklist,
            store,
            profile,
        })
    }

    pub async fn run(&mut self, should_terminate: Arc<AtomicBool>) -> anyhow::Result<()> {
        let mut server = CallbackServer::start(
            self.worklist.clone(),
            self.store.clone(),
            self.options.timeout,
            self.options.maxtabs,
        )
        .await
        .context("could not start callback server")?;

        info!("communicating with client on port {}", server.port());

        let mut supervisor = Supervisor::new(SessionLaunch {
            binary: self.options.binary.clone(),
            profile_dir: self.profile.dir().to_path_buf(),
            callback_port: server.port(),
        });

        let result = supervisor.run(&self.worklist, &should_terminate).await;

        server.shutdown().await;
        self.profile.release();

        match result {
            Err(e) => match e.downcast_ref::<CrawlerError>() {
                Some(CrawlerError::EarlyTermination) => {
                    info!("{}", "early termination requested, goodbye");
                    Ok(())
                }
                _ => Err(e),
            },
            Ok(()) => {
                info!("{}", "crawl complete");
                Ok(())
            }
        }
    }
}
