//! Image downloads for persisted records

use crate::config::FetchConfig;
use crate::storage::{ImageRecord, ImageStatus, StructuredRecord};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Downloads record images into `<image_dir>/<record id>/<n>.<ext>`
///
/// Failures are reported per image and never abort the record.
pub struct ImageDownloader {
    client: reqwest::Client,
    image_dir: PathBuf,
}

impl ImageDownloader {
    pub fn new(config: &FetchConfig, image_dir: impl Into<PathBuf>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(user_agent) = config.user_agents.first() {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            image_dir: image_dir.into(),
        })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Downloads every image of `record`, one result per URL
    pub async fn download_all(&self, record: &StructuredRecord) -> Vec<ImageRecord> {
        let record_dir = self.image_dir.join(sanitize(&record.id));
        let mut results = Vec::with_capacity(record.image_urls.len());

        for (index, source_url) in record.image_urls.iter().enumerate() {
            let target = record_dir.join(format!("{}.{}", index + 1, extension(source_url)));
            let result = match self.download(source_url, &target).await {
                Ok(()) => ImageRecord {
                    record_id: record.id.clone(),
                    source_url: source_url.clone(),
                    local_path: Some(target.to_string_lossy().into_owned()),
                    status: ImageStatus::Downloaded,
                    error: None,
                },
                Err(message) => {
                    tracing::debug!("Image {} of record {} failed: {}", source_url, record.id, message);
                    ImageRecord {
                        record_id: record.id.clone(),
                        source_url: source_url.clone(),
                        local_path: None,
                        status: ImageStatus::Failed,
                        error: Some(message),
                    }
                }
            };
            results.push(result);
        }

        results
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::write(target, &bytes)
            .await
            .map_err(|e| e.to_string())
    }
}

/// File extension of an image URL, "jpg" when there is no usable one
fn extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let last = parsed.path_segments()?.last()?.to_string();
            let (_, ext) = last.rsplit_once('.')?;
            let ext = ext.to_ascii_lowercase();
            (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .then_some(ext)
        })
        .unwrap_or_else(|| "jpg".to_string())
}

/// Keeps a record id safe to use as a directory name
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
