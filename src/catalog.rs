use crate::config::S3Config;
use crate::prefix;
use crate::usage::UsageStats;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// One grouped result of a listing scan.
///
/// Every video found under the queried prefix is collected into a single
/// listing keyed by a normalized form of that prefix. Listings spanning
/// multiple true sub-folders deliberately collapse into one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListing {
    /// Identifier derived from the queried prefix (`/` replaced by `-`).
    pub id: String,
    /// The queried prefix, verbatim.
    pub name: String,
    /// Video object names in listing order, directory markers excluded.
    pub videos: Vec<String>,
}

/// Listing facet of the catalog consumed by the orchestrator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VideoLister: Send + Sync {
    /// List all videos under `prefix`. Zero matches is `Ok(vec![])`, not
    /// an error; `Err` means the object store itself failed.
    async fn list_videos(&self, bucket: &str, prefix: &str) -> Result<Vec<FolderListing>>;
}

/// Object-store client for the video namespace.
///
/// Wraps the S3 client with the listing, usage-scan and object operations
/// the orchestrator and the extraction adapter need. The catalog never
/// creates bucket-level resources; it only manipulates keys.
pub struct ObjectCatalog {
    client: S3Client,
}

impl ObjectCatalog {
    /// Build a catalog from S3 configuration.
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "Object catalog initialized");

        Ok(Self { client })
    }

    /// Full paginated listing of every key under `prefix`, with sizes.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, u64)>> {
        let mut keys = Vec::new();

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("Failed to list objects")?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    keys.push((key.to_string(), size));
                }
            }
        }

        Ok(keys)
    }

    /// Scan the whole prefix once and aggregate usage counters.
    ///
    /// Fail-closed: a transport error anywhere mid-scan discards the
    /// partial counts and yields zeroed stats.
    #[instrument(skip(self))]
    pub async fn scan_usage(&self, bucket: &str, prefix: &str) -> UsageStats {
        match self.try_scan_usage(bucket, prefix).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, bucket = %bucket, "Usage scan failed, returning zeroed stats");
                UsageStats::default()
            }
        }
    }

    async fn try_scan_usage(&self, bucket: &str, prefix: &str) -> Result<UsageStats> {
        let mut stats = UsageStats::default();

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("Failed to scan bucket for usage stats")?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    stats.record(key, object.size().unwrap_or(0).max(0) as u64);
                }
            }
        }

        debug!(
            total_videos = stats.total_videos,
            total_detections = stats.total_detections,
            "Usage scan complete"
        );

        Ok(stats)
    }

    /// Upload raw bytes to a key.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("Failed to upload object '{key}'"))?;

        debug!(key = %key, "Object uploaded");
        Ok(())
    }

    /// Download an object to a local file.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn download_to_path(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download object '{key}'"))?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?
            .into_bytes();

        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))?;

        debug!(size_bytes = bytes.len(), "Object downloaded");
        Ok(())
    }

    /// Check whether a key exists, using a head request. A missing key is
    /// `Ok(false)`; any other failure propagates.
    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    /// Generate a time-limited GET URL for an object.
    pub async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expiry)
            .context("Invalid presigned URL expiration")?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .context("Failed to presign object URL")?;

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl VideoLister for ObjectCatalog {
    #[instrument(skip(self))]
    async fn list_videos(&self, bucket: &str, prefix: &str) -> Result<Vec<FolderListing>> {
        let keys = self.list_keys(bucket, prefix).await?;
        let listings = group_video_keys(prefix, keys.into_iter().map(|(key, _)| key));

        debug!(
            video_count = listings.first().map(|f| f.videos.len()).unwrap_or(0),
            "Listed videos under prefix"
        );

        Ok(listings)
    }
}

/// Group listed keys into folder listings.
///
/// Directory-marker keys (trailing `/`) are dropped, as are keys with no
/// path separator at all. Everything else contributes its final segment
/// as a video name under one listing keyed by the queried prefix.
pub(crate) fn group_video_keys(
    prefix: &str,
    keys: impl IntoIterator<Item = String>,
) -> Vec<FolderListing> {
    let mut videos = Vec::new();

    for key in keys {
        if key.ends_with('/') {
            continue;
        }
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() > 1 {
            videos.push(parts[parts.len() - 1].to_string());
        }
    }

    if videos.is_empty() {
        return Vec::new();
    }

    vec![FolderListing {
        id: prefix::folder_id(prefix),
        name: prefix.to_string(),
        videos,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_group_video_keys_excludes_directory_markers() {
        let listings = group_video_keys(
            "w/in/",
            keys(&["w/in/", "w/in/a.mp4", "w/in/sub/", "w/in/b.mov"]),
        );

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].videos, vec!["a.mp4", "b.mov"]);
    }

    #[test]
    fn test_group_video_keys_empty_is_not_an_error() {
        assert!(group_video_keys("w/in/", keys(&[])).is_empty());
        assert!(group_video_keys("w/in/", keys(&["w/in/", "w/in/sub/"])).is_empty());
    }

    #[test]
    fn test_group_video_keys_flattens_sub_folders() {
        // Keys from two true sub-folders collapse into one listing keyed
        // by the queried prefix.
        let listings = group_video_keys(
            "w/in",
            keys(&["w/in/front/a.mp4", "w/in/rear/b.mp4"]),
        );

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "w-in");
        assert_eq!(listings[0].name, "w/in");
        assert_eq!(listings[0].videos, vec!["a.mp4", "b.mp4"]);
    }

    #[test]
    fn test_group_video_keys_preserves_listing_order() {
        let listings = group_video_keys(
            "w/in",
            keys(&["w/in/c.mp4", "w/in/a.mp4", "w/in/b.mp4"]),
        );

        assert_eq!(listings[0].videos, vec!["c.mp4", "a.mp4", "b.mp4"]);
    }

    #[test]
    fn test_group_video_keys_skips_bare_keys() {
        // A key with no separator has no containing folder.
        let listings = group_video_keys("", keys(&["orphan.mp4", "w/in/a.mp4"]));
        assert_eq!(listings[0].videos, vec!["a.mp4"]);
    }

    #[test]
    fn test_folder_listing_serialization() {
        let listing = FolderListing {
            id: "w-in".to_string(),
            name: "w/in".to_string(),
            videos: vec!["a.mp4".to_string()],
        };

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["id"], "w-in");
        assert_eq!(json["videos"][0], "a.mp4");
    }
}
