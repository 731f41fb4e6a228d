//! Stock media lookup and download.
//!
//! Every insertion decision carries a search query. [`fetch_assets`] resolves
//! it to a downloaded file through an [`AssetProvider`]; decisions that find
//! nothing are dropped so they never reach the timeline.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::decision::{AssetKind, InsertionDecision};
use crate::error::{Error, Result};
use crate::timeline::AspectRatio;

const PEXELS_VIDEO_SEARCH: &str = "https://api.pexels.com/videos/search";
const PEXELS_PHOTO_SEARCH: &str = "https://api.pexels.com/v1/search";

pub const PEXELS_API_KEY_VAR: &str = "PEXELS_API_KEY";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest file stem kept by [`sanitize_filename`].
const MAX_STEM_LEN: usize = 200;

/// A matched remote asset, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: String,
    pub kind: AssetKind,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Finds and materializes stock media.
pub trait AssetProvider {
    /// Best match for `query` in the orientation of `aspect_ratio`, if any.
    fn search(
        &self,
        query: &str,
        aspect_ratio: AspectRatio,
    ) -> impl Future<Output = Result<Option<AssetRef>>> + Send;

    /// Download `asset` to `dest`.
    fn download(
        &self,
        asset: &AssetRef,
        dest: &Path,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Which Pexels catalogue to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Videos,
    Photos,
}

/// Pexels search client.
#[derive(Debug, Clone)]
pub struct PexelsClient {
    client: reqwest::Client,
    api_key: String,
    media_type: MediaType,
    show_progress: bool,
}

impl PexelsClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            media_type: MediaType::default(),
            show_progress: false,
        })
    }

    /// Read the key from `PEXELS_API_KEY`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PEXELS_API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Self::new(key),
            _ => Err(Error::MissingApiKey(PEXELS_API_KEY_VAR)),
        }
    }

    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Draw a progress bar for each download.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn search_url(&self, query: &str, aspect_ratio: AspectRatio) -> Result<reqwest::Url> {
        let base = match self.media_type {
            MediaType::Videos => PEXELS_VIDEO_SEARCH,
            MediaType::Photos => PEXELS_PHOTO_SEARCH,
        };
        reqwest::Url::parse_with_params(
            base,
            &[
                ("query", query),
                ("orientation", aspect_ratio.orientation()),
                ("per_page", "1"),
                ("size", "medium"),
            ],
        )
        .map_err(|e| Error::AssetFetch(format!("bad search url: {e}")))
    }
}

impl AssetProvider for PexelsClient {
    async fn search(&self, query: &str, aspect_ratio: AspectRatio) -> Result<Option<AssetRef>> {
        let url = self.search_url(query, aspect_ratio)?;
        debug!(%url, "searching pexels");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::AssetFetch(format!("pexels search failed: {e}")))?;

        let body = response.text().await?;
        match self.media_type {
            MediaType::Videos => Ok(select_video(&serde_json::from_str(&body)?)),
            MediaType::Photos => Ok(select_photo(&serde_json::from_str(&body)?)),
        }
    }

    async fn download(&self, asset: &AssetRef, dest: &Path) -> Result<PathBuf> {
        download_to(&self.client, &asset.url, dest, self.show_progress).await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoSearch {
    #[serde(default)]
    pub videos: Vec<PexelsVideo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PexelsVideo {
    #[serde(default)]
    pub video_files: Vec<VideoFile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoFile {
    pub quality: Option<String>,
    pub link: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotoSearch {
    #[serde(default)]
    pub photos: Vec<PexelsPhoto>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PexelsPhoto {
    #[serde(default)]
    pub src: PhotoSources,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotoSources {
    pub large: Option<String>,
    pub original: Option<String>,
}

/// First result's HD or SD rendition, else its first file. 4K files are
/// only taken when nothing else exists.
pub fn select_video(search: &VideoSearch) -> Option<AssetRef> {
    let files = &search.videos.first()?.video_files;
    let file = files
        .iter()
        .find(|f| matches!(f.quality.as_deref(), Some("hd" | "sd")))
        .or_else(|| files.first())?;

    Some(AssetRef {
        url: file.link.clone(),
        kind: AssetKind::Video,
        extension: "mp4",
        width: file.width.unwrap_or(0),
        height: file.height.unwrap_or(0),
    })
}

/// First result's large rendition, else its original.
pub fn select_photo(search: &PhotoSearch) -> Option<AssetRef> {
    let photo = search.photos.first()?;
    let url = photo.src.large.as_ref().or(photo.src.original.as_ref())?;

    Some(AssetRef {
        url: url.clone(),
        kind: AssetKind::Image,
        extension: "jpg",
        width: photo.width.unwrap_or(0),
        height: photo.height.unwrap_or(0),
    })
}

/// Stream `url` into `dest` through a `.part` file renamed on completion.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    show_progress: bool,
) -> Result<PathBuf> {
    debug!(%url, dest = %dest.display(), "downloading asset");
    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::AssetFetch(format!("download failed: {e}")))?;

    let total_size = response.content_length().unwrap_or(0);
    let pb = if show_progress {
        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(
            dest.file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = part_path(dest);
    let mut file = std::fs::File::create(&tmp_path)?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                std::fs::remove_file(&tmp_path).ok();
                return Err(e.into());
            }
        };
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;
    drop(file);

    if downloaded == 0 {
        std::fs::remove_file(&tmp_path).ok();
        return Err(Error::AssetFetch(format!("empty download from {url}")));
    }

    std::fs::rename(&tmp_path, dest)?;
    pb.finish_and_clear();

    info!(
        path = %dest.display(),
        size_mb = format!("{:.2}", downloaded as f64 / (1024.0 * 1024.0)),
        "asset downloaded"
    );
    Ok(dest.to_path_buf())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Replace characters that are invalid in file names on common platforms and
/// cap the stem at 200 characters, keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();

    let (stem, ext) = match cleaned.rfind('.') {
        Some(idx) if idx > 0 => cleaned.split_at(idx),
        _ => (cleaned.as_str(), ""),
    };
    let stem: String = stem.chars().take(MAX_STEM_LEN).collect();
    format!("{stem}{ext}")
}

/// Resolve and download an asset for each decision.
///
/// Searches the decision's query first, then its entity type. Decisions
/// without a match, or whose download fails, are left out of the result.
pub async fn fetch_assets<P: AssetProvider>(
    provider: &P,
    decisions: &[InsertionDecision],
    output_dir: &Path,
    aspect_ratio: AspectRatio,
) -> Result<Vec<InsertionDecision>> {
    std::fs::create_dir_all(output_dir)?;
    let mut resolved = Vec::with_capacity(decisions.len());

    for (idx, decision) in decisions.iter().enumerate() {
        info!(
            n = idx + 1,
            total = decisions.len(),
            query = %decision.search_query,
            word = %decision.word,
            "fetching asset"
        );

        match fetch_one(provider, decision, idx, output_dir, aspect_ratio).await {
            Ok(Some(d)) => resolved.push(d),
            Ok(None) => warn!(word = %decision.word, "no asset found, insertion skipped"),
            Err(e) => error!(word = %decision.word, error = %e, "asset fetch failed"),
        }
    }

    info!(
        resolved = resolved.len(),
        total = decisions.len(),
        "asset fetching complete"
    );
    Ok(resolved)
}

async fn fetch_one<P: AssetProvider>(
    provider: &P,
    decision: &InsertionDecision,
    idx: usize,
    output_dir: &Path,
    aspect_ratio: AspectRatio,
) -> Result<Option<InsertionDecision>> {
    let mut asset = None;
    if !decision.search_query.trim().is_empty() {
        match provider.search(&decision.search_query, aspect_ratio).await {
            Ok(found) => asset = found,
            Err(e) => warn!(query = %decision.search_query, error = %e, "search failed"),
        }
    }
    if asset.is_none() {
        let fallback = decision.entity_type.fallback_query();
        warn!(query = %decision.search_query, fallback, "no results, trying entity type");
        asset = provider.search(fallback, aspect_ratio).await?;
    }
    let Some(asset) = asset else {
        return Ok(None);
    };

    let filename = sanitize_filename(&format!("{}_{idx}.{}", decision.word, asset.extension));
    let path = provider.download(&asset, &output_dir.join(filename)).await?;
    Ok(Some(decision.clone().with_asset(path, asset.kind)))
}
