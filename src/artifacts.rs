use std::path::PathBuf;

use anyhow::{anyhow, Context};
use base64::Engine;
use chrono::{Local, TimeZone};
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::types::{CrawlResult, StoredArtifact};
use crate::utils::FORMAT_STRING;

/// Name under which a crawl of one page is filed:
/// `{hostname}-{local start time}-{sha256 of the url}`. Every artifact of
/// that crawl (screenshot, source, metadata) shares the base and differs
/// only in extension, so a second crawl of the same URL never collides
/// while the files of one crawl always sort together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    base: String,
}

impl ArtifactKey {
    pub fn derive(url: &str, start_time_ms: i64) -> anyhow::Result<Self> {
        let parsed = Url::parse(url).context(format!("invalid result url {}", url))?;
        let hostname = parsed
            .host_str()
            .ok_or_else(|| anyhow!("result url {} has no host", url))?
            .to_string();

        let ts = Local
            .timestamp_millis_opt(start_time_ms)
            .single()
            .ok_or_else(|| anyhow!("invalid start time {}", start_time_ms))?;

        let digest = Sha256::digest(url.as_bytes());

        Ok(ArtifactKey {
            base: format!("{}-{}-{:x}", hostname, ts.format(FORMAT_STRING), digest),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.base, extension)
    }
}

/// Writes crawl results to disk, one trio of files per page. Screenshot
/// payloads arrive as URLs (usually `data:` from the extension) and are
/// resolved to bytes before writing.
pub struct ArtifactStore {
    outdir: PathBuf,
    client: reqwest::Client,
}

impl ArtifactStore {
    pub fn new(outdir: &std::path::Path) -> Self {
        ArtifactStore {
            outdir: outdir.to_path_buf(),
            client: reqwest::Client::new(),
        }
    }

    pub fn outdir(&self) -> &std::path::Path {
        &self.outdir
    }

    /// Persists one result: `.jpg` for the screenshot, `.xml` for the page
    /// source, `.json` for everything else. The consumed payload fields are
    /// dropped from the metadata file.
    pub async fn store(&self, mut result: CrawlResult) -> anyhow::Result<StoredArtifact> {
        let key = ArtifactKey::derive(&result.url, result.start_time)?;

        fs::create_dir_all(&self.outdir)
            .await
            .context(format!("could not create output dir {:?}", self.outdir))?;

        let screenshot_file = match result.screenshot.take() {
            Some(payload_url) => {
                let bytes = self.resolve_payload(&payload_url).await.context(format!(
                    "could not resolve screenshot for {}",
                    result.url
                ))?;
                let path = self.outdir.join(key.file_name("jpg"));
                fs::write(&path, bytes)
                    .await
                    .context(format!("could not write screenshot {:?}", path))?;
                Some(path)
            }
            None => None,
        };

        let source_file = match result.source.take() {
            Some(source) => {
                let path = self.outdir.join(key.file_name("xml"));
                fs::write(&path, source)
                    .await
                    .context(format!("could not write page source {:?}", path))?;
                Some(path)
            }
            None => None,
        };

        // key-sorted pretty json with a trailing newline, so output files
        // diff cleanly between runs
        let value = serde_json::to_value(&result)?;
        let mut metadata = serde_json::to_string_pretty(&value)?;
        metadata.push('\n');

        let metadata_file = self.outdir.join(key.file_name("json"));
        fs::write(&metadata_file, metadata)
            .await
            .context(format!("could not write metadata {:?}", metadata_file))?;

        Ok(StoredArtifact {
            base_name: key.base().to_string(),
            metadata_file,
            screenshot_file,
            source_file,
        })
    }

    /// Turns a screenshot URL into bytes. `data:` URLs are decoded in
    /// process, anything else is fetched over HTTP.
    async fn resolve_payload(&self, payload_url: &str) -> anyhow::Result<Vec<u8>> {
        if let Some(rest) = payload_url.strip_prefix("data:") {
            return decode_data_url(rest);
        }

        let res = self
            .client
            .get(payload_url)
            .send()
            .await
            .context(format!("could not fetch payload {}", payload_url))?;
        let bytes = res.bytes().await?;
        Ok(bytes.to_vec())
    }
}

fn decode_data_url(rest: &str) -> anyhow::Result<Vec<u8>> {
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("malformed data url"))?;

    if header.ends_with(";base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("could not decode base64 data url")?;
        Ok(bytes)
    } else {
        Ok(urlencoding::decode_binary(data.as_bytes()).into_owned())
    }
}
