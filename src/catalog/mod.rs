use async_trait::async_trait;

use crate::error::{ClipscribeError, Result};
use crate::utils::validate_and_normalize_url;

/// Read-only boundary to the video catalog: resolves a video identifier
/// to the canonical media URL the fetcher should download from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    async fn resolve_url(&self, video_id: &str) -> Result<String>;
}

/// Catalog backed by YouTube watch URLs.
///
/// Accepts either a bare video id (turned into a watch URL) or a full
/// http(s) URL, which is validated and passed through unchanged.
pub struct YoutubeCatalog;

impl YoutubeCatalog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoCatalog for YoutubeCatalog {
    async fn resolve_url(&self, video_id: &str) -> Result<String> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(ClipscribeError::InvalidArgument(
                "video id must not be empty".to_string(),
            ));
        }

        if video_id.starts_with("http://") || video_id.starts_with("https://") {
            return validate_and_normalize_url(video_id);
        }

        Ok(format!(
            "https://www.youtube.com/watch?v={}",
            urlencoding::encode(video_id)
        ))
    }
}

impl Default for YoutubeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bare_id_becomes_watch_url() {
        let catalog = YoutubeCatalog::new();
        let url = catalog.resolve_url("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_id_is_percent_encoded() {
        let catalog = YoutubeCatalog::new();
        let url = catalog.resolve_url("a b&c").await.unwrap();
        assert_eq!(url, "https://www.youtube.com/watch?v=a%20b%26c");
    }

    #[tokio::test]
    async fn test_full_url_passes_through() {
        let catalog = YoutubeCatalog::new();
        let url = catalog
            .resolve_url("https://example.com/clip.mp3")
            .await
            .unwrap();
        assert_eq!(url, "https://example.com/clip.mp3");
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let catalog = YoutubeCatalog::new();
        let err = catalog.resolve_url("  ").await.unwrap_err();
        assert!(matches!(err, ClipscribeError::InvalidArgument(_)));
    }
}
