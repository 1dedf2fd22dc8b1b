use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::VideoCatalog;
use crate::engine::{EngineResult, RawSegment, TranscriptionEngine};
use crate::error::{ClipscribeError, Result};
use crate::fetcher::AudioFetcher;
use crate::store::{NewSegment, Segment, Transcript, TranscriptStatus, TranscriptWriter};

/// A finished pipeline run: the persisted header plus its segments
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub transcript: Transcript,
    pub segments: Vec<Segment>,
}

/// Sequences the transcription stages and enforces the status machine.
///
/// `pending → downloading → transcribing → persisting → completed`, with
/// `failed` terminal from any non-terminal state. Adapters classify their
/// own failures; the orchestrator performs no recovery — any stage error
/// marks the row failed and is surfaced verbatim.
pub struct TranscriptionPipeline {
    catalog: Arc<dyn VideoCatalog>,
    fetcher: Arc<dyn AudioFetcher>,
    engine: Arc<dyn TranscriptionEngine>,
    store: Arc<dyn TranscriptWriter>,
}

impl TranscriptionPipeline {
    pub fn new(
        catalog: Arc<dyn VideoCatalog>,
        fetcher: Arc<dyn AudioFetcher>,
        engine: Arc<dyn TranscriptionEngine>,
        store: Arc<dyn TranscriptWriter>,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            engine,
            store,
        }
    }

    /// Run the full pipeline and persist the result.
    ///
    /// The `pending` row is created before any external call; a duplicate
    /// non-failed attempt for the same (video, language) surfaces as
    /// `Conflict` right here. The audio download directory is scoped to
    /// this invocation and removed on every exit path.
    pub async fn create_transcription(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        language: &str,
    ) -> Result<TranscriptionOutcome> {
        let transcript = self
            .store
            .create_transcript(video_id, language, TranscriptStatus::Pending)
            .await?;
        info!("transcript {} created for video {}", transcript.id, video_id);

        match self.run_stages(cancel, &transcript.id, video_id, language).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(store_err) = self.store.mark_failed(&transcript.id, &err.to_string()).await
                {
                    warn!(
                        "could not mark transcript {} as failed: {}",
                        transcript.id, store_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Run download and transcription without touching the store.
    ///
    /// Proves the pipeline and the persistence layer are decoupled: the
    /// normalized result goes straight back to the caller and can never
    /// be observed through `get`/`list`.
    pub async fn dry_run(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        language: &str,
    ) -> Result<EngineResult> {
        let result = self.fetch_and_transcribe(cancel, video_id, language).await?;
        let segments = validate_engine_result(&result)?;

        Ok(EngineResult {
            text: result.text,
            language: result.language,
            duration: result.duration,
            segments: segments
                .into_iter()
                .map(|s| RawSegment {
                    start: s.start_time,
                    end: s.end_time,
                    text: s.text,
                    confidence: s.confidence,
                })
                .collect(),
        })
    }

    async fn run_stages(
        &self,
        cancel: &CancellationToken,
        transcript_id: &str,
        video_id: &str,
        language: &str,
    ) -> Result<TranscriptionOutcome> {
        self.store
            .set_status(transcript_id, TranscriptStatus::Downloading)
            .await?;
        ensure_not_cancelled(cancel)?;

        let video_url = self.catalog.resolve_url(video_id).await?;

        let audio_dir = tempfile::tempdir().map_err(|e| {
            ClipscribeError::StorageFailure(format!("failed to create download directory: {}", e))
        })?;
        let audio_path = self
            .fetcher
            .download_audio(cancel, &video_url, audio_dir.path())
            .await?;

        self.store
            .set_status(transcript_id, TranscriptStatus::Transcribing)
            .await?;
        ensure_not_cancelled(cancel)?;

        let result = self.engine.transcribe(cancel, &audio_path, language).await?;
        let segments = validate_engine_result(&result)?;

        self.store
            .set_status(transcript_id, TranscriptStatus::Persisting)
            .await?;

        let persisted = self.store.create_segments(transcript_id, &segments).await?;
        let total_duration = result.duration.or_else(|| segments.last().map(|s| s.end_time));
        let transcript = self
            .store
            .mark_completed(transcript_id, &result.language, total_duration)
            .await?;

        info!(
            "transcript {} completed with {} segments",
            transcript_id,
            persisted.len()
        );
        Ok(TranscriptionOutcome {
            transcript,
            segments: persisted,
        })
    }

    async fn fetch_and_transcribe(
        &self,
        cancel: &CancellationToken,
        video_id: &str,
        language: &str,
    ) -> Result<EngineResult> {
        ensure_not_cancelled(cancel)?;
        let video_url = self.catalog.resolve_url(video_id).await?;

        let audio_dir = tempfile::tempdir().map_err(|e| {
            ClipscribeError::StorageFailure(format!("failed to create download directory: {}", e))
        })?;
        info!("dry run: downloading audio for video {}", video_id);
        let audio_path = self
            .fetcher
            .download_audio(cancel, &video_url, audio_dir.path())
            .await?;

        info!("dry run: transcribing {}", audio_path.display());
        self.engine.transcribe(cancel, &audio_path, language).await
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ClipscribeError::Cancelled(
            "transcription pipeline cancelled".to_string(),
        ));
    }
    Ok(())
}

/// Validate and normalize an `EngineResult` into persistable segments.
///
/// Starts must be non-decreasing and timing non-negative; zero-length
/// spans are dropped (they cannot satisfy the `start < end` row
/// invariant) and the remainder reindexed 0..N-1 by position.
pub fn validate_engine_result(result: &EngineResult) -> Result<Vec<NewSegment>> {
    let mut segments = Vec::with_capacity(result.segments.len());
    let mut previous_start = 0.0_f64;

    for (index, segment) in result.segments.iter().enumerate() {
        if !segment.start.is_finite() || !segment.end.is_finite() || segment.start < 0.0 {
            return Err(ClipscribeError::ExternalToolFailed(format!(
                "engine segment {} has invalid timing ({} .. {})",
                index, segment.start, segment.end
            )));
        }
        if segment.end < segment.start {
            return Err(ClipscribeError::ExternalToolFailed(format!(
                "engine segment {} ends before it starts ({} .. {})",
                index, segment.start, segment.end
            )));
        }
        if index > 0 && segment.start < previous_start {
            return Err(ClipscribeError::ExternalToolFailed(format!(
                "engine segment {} starts before its predecessor ({} < {})",
                index, segment.start, previous_start
            )));
        }
        previous_start = segment.start;

        if segment.end > segment.start {
            segments.push(NewSegment {
                start_time: segment.start,
                end_time: segment.end,
                text: segment.text.clone(),
                confidence: segment.confidence,
            });
        }
    }

    Ok(segments)
}
