use std::path::Path;

use anyhow::Context;
use tokio::sync::Mutex;

/// Ordered list of URLs still waiting to be crawled. Shared between the
/// callback server (which removes entries as pages are persisted) and the
/// session supervisor (which keeps restarting the browser while entries
/// remain), so all access goes through an async mutex.
pub struct Worklist {
    urls: Mutex<Vec<String>>,
}

impl Worklist {
    pub fn new(urls: Vec<String>) -> Self {
        Worklist {
            urls: Mutex::new(urls),
        }
    }

    /// Loads one URL per line, skipping blank lines. Duplicates are kept,
    /// a URL listed twice is crawled twice.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .context(format!("could not read url list at {:?}", path))?;

        let urls = data
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect::<Vec<String>>();

        Ok(Self::new(urls))
    }

    pub async fn remaining(&self) -> Vec<String> {
        self.urls.lock().await.clone()
    }

    /// Removes the first occurrence of `url`. A URL that is not present is
    /// ignored, a late or repeated callback must not fail.
    pub async fn remove(&self, url: &str) {
        let mut urls = self.urls.lock().await;
        if let Some(pos) = urls.iter().position(|u| u == url) {
            urls.remove(pos);
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.urls.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.urls.lock().await.len()
    }
}
