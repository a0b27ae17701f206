use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("early_termination")]
    EarlyTermination,
}

/// Payload a browser tab posts back once it is done with a page. Fields the
/// crawler extension adds beyond the known ones (frames, requests, ...) are
/// carried verbatim in `extra` and end up in the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub base_name: String,
    pub metadata_file: PathBuf,
    pub screenshot_file: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
}
