use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use walkdir::WalkDir;

/// Filter value the extension reports for element hiding hits.
pub const ELEMHIDE: &str = "ELEMHIDE";

#[derive(Debug, Deserialize)]
struct PageRecord {
    #[serde(default)]
    requests: Vec<RequestEntry>,
}

#[derive(Debug, Deserialize)]
struct RequestEntry {
    #[serde(default)]
    filter: Option<String>,
    #[serde(default, rename = "contentType")]
    content_type: String,
    #[serde(default)]
    location: String,
}

/// Rough resource class of a blocked URL, guessed from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Style,
    Script,
}

impl ResourceKind {
    pub fn guess(url: &str) -> Self {
        const IMAGE_HINTS: [&str; 6] = [".jpg", ".jpeg", ".gif", ".png", ".svg", ".bmp"];
        const STYLE_HINTS: [&str; 2] = [".css", ".woff"];

        if IMAGE_HINTS.iter().any(|h| url.contains(h)) {
            ResourceKind::Image
        } else if STYLE_HINTS.iter().any(|h| url.contains(h)) {
            ResourceKind::Style
        } else {
            ResourceKind::Script
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Style => "style",
            ResourceKind::Script => "script",
        }
    }
}

/// Hit counts per filter, split into blocking and element hiding filters,
/// accumulated across every metadata file of a crawl output directory.
#[derive(Debug, Default)]
pub struct FilterTally {
    pub blocking: HashMap<String, u64>,
    pub elemhide: HashMap<String, u64>,
    pub blocked_urls: HashSet<String>,
}

impl FilterTally {
    /// Walks `outdir` recursively and tallies every `.json` metadata file.
    /// Unreadable or unparsable files are logged and skipped, a single
    /// corrupt artifact must not sink the whole report.
    pub fn scan(outdir: &Path) -> anyhow::Result<Self> {
        let mut tally = FilterTally::default();
        let mut files = 0usize;

        for entry in WalkDir::new(outdir).sort_by_file_name() {
            let entry = entry.context(format!("could not walk {:?}", outdir))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let data = match std::fs::read_to_string(entry.path()) {
                Ok(d) => d,
                Err(e) => {
                    warn!("skipping unreadable file {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            let record: PageRecord = match serde_json::from_str(&data) {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping malformed metadata {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            tally.add(record);
            files += 1;
        }

        debug!("tallied {} metadata files", files);
        Ok(tally)
    }

    fn add(&mut self, record: PageRecord) {
        for request in record.requests {
            let filter = match request.filter {
                Some(f) if !f.is_empty() => f,
                _ => continue,
            };

            if request.content_type == ELEMHIDE {
                *self.elemhide.entry(filter).or_insert(0) += 1;
            } else {
                *self.blocking.entry(filter).or_insert(0) += 1;
                if !request.location.is_empty() {
                    self.blocked_urls.insert(request.location);
                }
            }
        }
    }

    pub fn blocking_hits(&self) -> u64 {
        self.blocking.values().sum()
    }

    pub fn elemhide_hits(&self) -> u64 {
        self.elemhide.values().sum()
    }
}

/// Downloads every blocked URL once and records its body size, `workers`
/// fetches in flight at a time. Unreachable resources count as zero bytes
/// rather than aborting the measurement.
pub async fn measure_blocked_resources(
    urls: &HashSet<String>,
    workers: usize,
) -> HashMap<String, u64> {
    let client = reqwest::Client::new();

    let (url_tx, url_rx) = mpsc::channel::<String>(urls.len().max(1));
    let (size_tx, mut size_rx) = mpsc::channel::<(String, u64)>(urls.len().max(1));

    for url in urls {
        url_tx.send(url.clone()).await.ok();
    }
    drop(url_tx);

    ReceiverStream::new(url_rx)
        .for_each_concurrent(workers, |url| {
            let client = client.clone();
            let size_tx = size_tx.clone();
            async move {
                let size = fetch_size(&client, &url).await;
                size_tx.send((url, size)).await.ok();
            }
        })
        .await;
    drop(size_tx);

    let mut sizes = HashMap::new();
    while let Some((url, size)) = size_rx.recv().await {
        sizes.insert(url, size);
    }
    sizes
}

async fn fetch_size(client: &reqwest::Client, url: &str) -> u64 {
    let res = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("could not fetch {}: {}", url, e);
            return 0;
        }
    };
    match res.bytes().await {
        Ok(body) => body.len() as u64,
        Err(e) => {
            warn!("could not read body of {}: {}", url, e);
            0
        }
    }
}

/// Prints the per-filter hit counts for the requested filter types, one
/// line per blocked resource with its kind and measured size, and one
/// machine-grepable summary line.
pub fn print_report(tally: &FilterTally, sizes: &HashMap<String, u64>, filter_types: &[String]) {
    if filter_types.iter().any(|t| t == "blocking") {
        print_counts("blocking filters:", &tally.blocking);
    }
    if filter_types.iter().any(|t| t == "elemhide") {
        print_counts("element hiding filters:", &tally.elemhide);
    }

    if !tally.blocked_urls.is_empty() {
        let mut urls = tally.blocked_urls.iter().collect::<Vec<_>>();
        urls.sort();
        println!("blocked resources:");
        for url in urls {
            let size = sizes.get(url).copied().unwrap_or(0);
            println!("  {} {} {}", ResourceKind::guess(url).label(), size, url);
        }
    }

    let total: u64 = sizes.values().sum();
    let savesize = if sizes.is_empty() {
        0
    } else {
        total / sizes.len() as u64
    };

    println!(
        "counts: all[{}] blocking[{}] elemhide[{}] savesize[{}]",
        tally.blocking_hits() + tally.elemhide_hits(),
        tally.blocking_hits(),
        tally.elemhide_hits(),
        savesize
    );
}

fn print_counts(heading: &str, counts: &HashMap<String, u64>) {
    let mut counts = counts.iter().collect::<Vec<_>>();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!("{}", heading);
    for (filter, count) in counts {
        println!("  {} {}", count, filter);
    }
}
