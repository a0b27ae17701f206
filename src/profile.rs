use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs;
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::utils::{create_random_tmp_folder, get_random_string};

/// Filter lists subscribed to when the user passes none.
pub const DEFAULT_FILTER_LISTS: [&str; 2] = [
    "https://easylist-downloads.adblockplus.org/easylist.txt",
    "https://easylist-downloads.adblockplus.org/exceptionrules.txt",
];

/// Latest published build of the ad blocking companion add-on.
pub const COMPANION_XPI_URL: &str =
    "https://addons.mozilla.org/firefox/downloads/latest/1865/addon-1865-latest.xpi";

/// Prefs that keep the browser from interrupting an unattended crawl.
const PROFILE_PREFS: [(&str, &str); 2] = [
    ("browser.uitour.enabled", "false"),
    ("prompts.tab_modal.enabled", "false"),
];

/// Where a filter list comes from. The CLI accepts either a plain URL or
/// `path=url`, a pre-downloaded copy on disk that still subscribes under
/// its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSource {
    Remote(String),
    Local { path: PathBuf, url: String },
}

impl FilterSource {
    pub fn parse(raw: &str) -> Self {
        // split on the first `=` only, the url half may contain more
        match raw.split_once('=') {
            Some((path, url)) => FilterSource::Local {
                path: PathBuf::from(path),
                url: url.to_string(),
            },
            None => FilterSource::Remote(raw.to_string()),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FilterSource::Remote(url) => url,
            FilterSource::Local { url, .. } => url,
        }
    }

    pub async fn content(&self, client: &reqwest::Client) -> anyhow::Result<String> {
        match self {
            FilterSource::Remote(url) => {
                let res = client
                    .get(url)
                    .send()
                    .await
                    .context(format!("could not download filter list {}", url))?;
                Ok(res.text().await?)
            }
            FilterSource::Local { path, .. } => fs::read_to_string(path)
                .await
                .context(format!("could not read filter list at {:?}", path)),
        }
    }
}

/// Zips an unpacked extension source tree into an installable `.xpi` under
/// /tmp. Entries keep their tree-relative paths, the browser rejects
/// archives with a wrapping top-level directory.
pub fn package_extension(source_dir: &Path) -> anyhow::Result<PathBuf> {
    let out_path = PathBuf::from(format!("/tmp/crawler-{}.xpi", get_random_string(11)));
    let out = File::create(&out_path)
        .context(format!("could not create extension bundle {:?}", out_path))?;

    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source_dir)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let data = std::fs::read(entry.path())
                .context(format!("could not read extension file {:?}", entry.path()))?;
            writer.write_all(&data)?;
        }
    }

    writer.finish()?;
    debug!("packaged {:?} into {:?}", source_dir, out_path);
    Ok(out_path)
}

/// Downloads the companion add-on build to a temp file.
pub async fn fetch_companion_addon(client: &reqwest::Client) -> anyhow::Result<PathBuf> {
    let res = client
        .get(COMPANION_XPI_URL)
        .send()
        .await
        .context("could not download companion add-on")?;
    let bytes = res.bytes().await?;

    let path = PathBuf::from(format!("/tmp/crawler-{}.xpi", get_random_string(11)));
    fs::write(&path, bytes)
        .await
        .context(format!("could not write companion add-on {:?}", path))?;
    Ok(path)
}

/// Throwaway browser profile with the crawler extension, companion add-on
/// and filter subscriptions preinstalled. Removed from disk on release, or
/// at the latest when dropped.
pub struct Profile {
    dir: PathBuf,
    released: bool,
}

impl Profile {
    pub async fn create(
        addons: &[PathBuf],
        filters: &[FilterSource],
        client: &reqwest::Client,
    ) -> anyhow::Result<Self> {
        let dir = create_random_tmp_folder()?;

        let extensions_dir = dir.join("extensions");
        fs::create_dir(&extensions_dir).await?;
        for addon in addons {
            let file_name = addon
                .file_name()
                .context(format!("addon bundle has no file name: {:?}", addon))?;
            fs::copy(addon, extensions_dir.join(file_name))
                .await
                .context(format!("could not install addon {:?}", addon))?;
        }

        let mut prefs = String::new();
        for (key, value) in PROFILE_PREFS {
            prefs.push_str(&format!("user_pref(\"{}\", {});\n", key, value));
        }
        fs::write(dir.join("user.js"), prefs).await?;

        install_filter_subscriptions(&dir, filters, client).await?;

        info!("created browser profile at {:?}", dir);
        Ok(Profile {
            dir,
            released: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!("could not remove profile dir {:?}: {}", self.dir, e);
        }
    }
}

impl Drop for Profile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Writes `adblockplus/patterns.ini` so the ad blocker starts with the
/// given lists already subscribed instead of downloading them on first
/// launch. Each list's first line is its own header and is dropped.
async fn install_filter_subscriptions(
    profile_dir: &Path,
    filters: &[FilterSource],
    client: &reqwest::Client,
) -> anyhow::Result<()> {
    let abp_dir = profile_dir.join("adblockplus");
    fs::create_dir(&abp_dir).await?;

    let mut patterns = String::from("# Adblock Plus preferences\nversion=4\n");
    for filter in filters {
        let data = filter.content(client).await?;

        patterns.push_str("\n[Subscription]\n");
        patterns.push_str(&format!("url={}\n", filter.url()));
        patterns.push_str("\n[Subscription filters]\n");
        for line in data.lines().skip(1) {
            patterns.push_str(line);
            patterns.push('\n');
        }
    }

    fs::write(abp_dir.join("patterns.ini"), patterns)
        .await
        .context("could not write patterns.ini")?;
    Ok(())
}
