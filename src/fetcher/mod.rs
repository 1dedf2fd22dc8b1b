use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClipscribeError, Result};
use crate::process::Supervisor;

/// Resolves a media URL to a local audio file.
///
/// Implementations write exactly one audio file under the caller-owned
/// `dest_dir` and never retry internally. All failures leave the adapter
/// already classified (see the error taxonomy); callers never inspect
/// tool diagnostics themselves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn download_audio(
        &self,
        cancel: &CancellationToken,
        video_url: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Audio fetcher using yt-dlp for platform-hosted video
pub struct YtDlpFetcher {
    supervisor: Arc<Supervisor>,
    yt_dlp_path: String,
    timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(supervisor: Arc<Supervisor>, yt_dlp_path: String, timeout: Duration) -> Self {
        Self {
            supervisor,
            yt_dlp_path,
            timeout,
        }
    }
}

#[async_trait]
impl AudioFetcher for YtDlpFetcher {
    async fn download_audio(
        &self,
        cancel: &CancellationToken,
        video_url: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let audio_path = dest_dir.join("audio.mp3");
        let output_template = dest_dir.join("audio.%(ext)s");
        let template = output_template.to_string_lossy();

        debug!("downloading audio for {} into {}", video_url, dest_dir.display());

        let args = [
            // Output to the caller-owned directory
            "--output",
            template.as_ref(),
            // Extract audio in the most efficient format for transcription
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "9",
            // Prioritize smaller/faster formats
            "--format",
            "worstaudio[acodec^=mp4a]/worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio",
            "--no-playlist",
            "--concurrent-fragments",
            "4",
            "--newline",
            video_url,
        ];

        let result = self
            .supervisor
            .run(cancel, &self.yt_dlp_path, &args, Some(self.timeout))
            .await;

        if let Err(err) = result {
            return Err(classify_download_failure(err));
        }

        if !audio_path.exists() {
            return Err(ClipscribeError::ExternalToolFailed(format!(
                "yt-dlp reported success but produced no audio file for {}",
                video_url
            )));
        }

        info!("downloaded audio to {}", audio_path.display());
        Ok(audio_path)
    }
}

/// Audio fetcher for direct media URLs, streamed over HTTP
pub struct DirectUrlFetcher {
    client: reqwest::Client,
}

impl DirectUrlFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AudioFetcher for DirectUrlFetcher {
    async fn download_audio(
        &self,
        cancel: &CancellationToken,
        video_url: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        use futures_util::StreamExt;
        use std::io::Write;

        let extension = audio_extension_of(video_url).unwrap_or("mp3");
        let audio_path = dest_dir.join(format!("audio.{}", extension));

        debug!("streaming {} into {}", video_url, audio_path.display());

        let response = self
            .client
            .get(video_url)
            .send()
            .await
            .map_err(classify_http_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 | 410 => ClipscribeError::VideoUnavailable(format!(
                    "{} returned HTTP {}",
                    video_url, status
                )),
                429 => ClipscribeError::RateLimited(format!(
                    "{} returned HTTP {}",
                    video_url, status
                )),
                _ => ClipscribeError::ExternalToolFailed(format!(
                    "{} returned HTTP {}",
                    video_url, status
                )),
            });
        }

        let mut file = fs_err::File::create(&audio_path)
            .map_err(|e| ClipscribeError::StorageFailure(e.to_string()))?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ClipscribeError::Cancelled(format!(
                    "download of {} cancelled",
                    video_url
                )));
            }
            let chunk = chunk.map_err(classify_http_failure)?;
            file.write_all(&chunk)
                .map_err(|e| ClipscribeError::StorageFailure(e.to_string()))?;
        }

        info!("downloaded audio to {}", audio_path.display());
        Ok(audio_path)
    }
}

impl Default for DirectUrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the fetcher for a resolved media URL: direct media links stream
/// over HTTP, everything else goes through yt-dlp.
pub fn is_direct_media_url(url: &str) -> bool {
    audio_extension_of(url).is_some()
}

fn audio_extension_of(url: &str) -> Option<&'static str> {
    let path = url::Url::parse(url).ok()?.path().to_lowercase();
    ["mp3", "m4a", "wav", "flac", "ogg", "webm"]
        .into_iter()
        .find(|ext| path.ends_with(&format!(".{}", ext)))
}

/// Classify a yt-dlp failure from its diagnostic text.
///
/// This is the single place where yt-dlp stderr is interpreted; past this
/// boundary only the typed kind travels.
fn classify_download_failure(err: ClipscribeError) -> ClipscribeError {
    let ClipscribeError::ExternalToolFailed(diag) = err else {
        return err;
    };

    let lower = diag.to_lowercase();

    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("account associated with this video has been terminated")
        || lower.contains("this video is not available")
    {
        ClipscribeError::VideoUnavailable(diag)
    } else if lower.contains("http error 429")
        || lower.contains("too many requests")
        || lower.contains("rate-limit")
    {
        ClipscribeError::RateLimited(diag)
    } else if lower.contains("unable to download")
        || lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("getaddrinfo")
        || lower.contains("network is unreachable")
    {
        ClipscribeError::NetworkFailure(diag)
    } else if lower.contains("no space left") || lower.contains("cannot allocate memory") {
        ClipscribeError::InsufficientResources(diag)
    } else {
        ClipscribeError::ExternalToolFailed(diag)
    }
}

fn classify_http_failure(err: reqwest::Error) -> ClipscribeError {
    if err.is_connect() || err.is_timeout() {
        ClipscribeError::NetworkFailure(err.to_string())
    } else {
        ClipscribeError::ExternalToolFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(diag: &str) -> ClipscribeError {
        ClipscribeError::ExternalToolFailed(diag.to_string())
    }

    #[test]
    fn test_classify_video_unavailable() {
        let err = classify_download_failure(failed("ERROR: Video unavailable"));
        assert!(matches!(err, ClipscribeError::VideoUnavailable(_)));

        let err = classify_download_failure(failed("ERROR: Private video. Sign in"));
        assert!(matches!(err, ClipscribeError::VideoUnavailable(_)));
    }

    #[test]
    fn test_classify_rate_limited() {
        let err = classify_download_failure(failed("HTTP Error 429: Too Many Requests"));
        assert!(matches!(err, ClipscribeError::RateLimited(_)));
    }

    #[test]
    fn test_classify_network_failure() {
        let err = classify_download_failure(failed(
            "ERROR: Unable to download webpage: <urlopen error timed out>",
        ));
        assert!(matches!(err, ClipscribeError::NetworkFailure(_)));
    }

    #[test]
    fn test_classify_insufficient_resources() {
        let err = classify_download_failure(failed("OSError: No space left on device"));
        assert!(matches!(err, ClipscribeError::InsufficientResources(_)));
    }

    #[test]
    fn test_unknown_diagnostics_stay_tool_failures() {
        let err = classify_download_failure(failed("something inexplicable"));
        assert!(matches!(err, ClipscribeError::ExternalToolFailed(_)));
    }

    #[test]
    fn test_missing_tool_passes_through_unchanged() {
        let err = classify_download_failure(ClipscribeError::ExternalToolMissing(
            "yt-dlp is not installed".into(),
        ));
        assert!(matches!(err, ClipscribeError::ExternalToolMissing(_)));
    }

    #[test]
    fn test_direct_media_url_detection() {
        assert!(is_direct_media_url("https://example.com/audio.mp3"));
        assert!(is_direct_media_url("https://example.com/a/b/clip.WAV"));
        assert!(!is_direct_media_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_direct_media_url("not a url"));
    }
}
