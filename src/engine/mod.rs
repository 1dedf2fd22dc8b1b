use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClipscribeError, Result};
use crate::process::Supervisor;

/// Sentinel language value requesting engine-side auto-detection
pub const AUTO_DETECT: &str = "auto";

/// Normalized output of the speech-to-text engine.
///
/// This is the single point of translation between whatever the engine
/// emits and the persisted segment shape. Timing is always seconds as
/// floating point, regardless of the engine's native unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineResult {
    pub text: String,
    pub language: String,
    pub duration: Option<f64>,
    pub segments: Vec<RawSegment>,
}

/// One contiguous span of recognized speech, prior to validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Whisper model sizes accepted by the engine adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
    Turbo,
}

impl ModelSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
            ModelSize::Turbo => "turbo",
        }
    }
}

impl FromStr for ModelSize {
    type Err = ClipscribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            "turbo" => Ok(ModelSize::Turbo),
            other => Err(ClipscribeError::InvalidArgument(format!(
                "unsupported model size '{}' (expected tiny, base, small, medium, large or turbo)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invokes the speech-to-text engine on a local audio file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        cancel: &CancellationToken,
        audio_path: &Path,
        language: &str,
    ) -> Result<EngineResult>;
}

/// Engine adapter for the `whisper` CLI
pub struct WhisperEngine {
    supervisor: Arc<Supervisor>,
    whisper_path: String,
    model: ModelSize,
    timeout: Duration,
}

impl WhisperEngine {
    pub fn new(
        supervisor: Arc<Supervisor>,
        whisper_path: String,
        model: ModelSize,
        timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            whisper_path,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperEngine {
    async fn transcribe(
        &self,
        cancel: &CancellationToken,
        audio_path: &Path,
        language: &str,
    ) -> Result<EngineResult> {
        let output_dir = tempfile::tempdir().map_err(|e| {
            ClipscribeError::StorageFailure(format!("failed to create temp directory: {}", e))
        })?;

        let audio = audio_path.to_string_lossy();
        let out_dir = output_dir.path().to_string_lossy();

        let mut args: Vec<&str> = vec![
            audio.as_ref(),
            "--model",
            self.model.as_str(),
            "--output_dir",
            out_dir.as_ref(),
            "--output_format",
            "json",
        ];
        if language != AUTO_DETECT {
            args.extend(["--language", language]);
        }

        info!(
            "transcribing {} with model {} (language: {})",
            audio_path.display(),
            self.model,
            language
        );

        self.supervisor
            .run(cancel, &self.whisper_path, &args, Some(self.timeout))
            .await?;

        // whisper writes <audio stem>.json into the output directory
        let stem = audio_path.file_stem().ok_or_else(|| {
            ClipscribeError::InvalidArgument(format!(
                "audio path has no file name: {}",
                audio_path.display()
            ))
        })?;
        let json_path = output_dir
            .path()
            .join(format!("{}.json", stem.to_string_lossy()));

        let json_content = fs_err::read_to_string(&json_path).map_err(|e| {
            ClipscribeError::ExternalToolFailed(format!(
                "whisper produced no structured output ({}): {}",
                json_path.display(),
                e
            ))
        })?;

        let result = parse_engine_output(&json_content, language)?;
        debug!(
            "engine produced {} segments in language {}",
            result.segments.len(),
            result.language
        );
        Ok(result)
    }
}

/// Raw whisper JSON shapes. Timing arrives either as floating seconds
/// (`start`/`end`) or as millisecond offsets (`offsets.from`/`.to`,
/// whisper.cpp dialect); both normalize to seconds here.
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: Option<String>,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: Option<f64>,
    end: Option<f64>,
    offsets: Option<WhisperOffsets>,
    text: String,
    confidence: Option<f64>,
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: f64,
    to: f64,
}

/// Parse and normalize the engine's structured output.
///
/// Malformed JSON or segments without usable timing surface as
/// `ExternalToolFailed`, never as a silently empty result.
pub fn parse_engine_output(json: &str, requested_language: &str) -> Result<EngineResult> {
    let raw: WhisperOutput = serde_json::from_str(json).map_err(|e| {
        ClipscribeError::ExternalToolFailed(format!("failed to parse whisper JSON: {}", e))
    })?;

    let mut segments = Vec::with_capacity(raw.segments.len());
    for (index, seg) in raw.segments.into_iter().enumerate() {
        let (start, end) = match (seg.start, seg.end, &seg.offsets) {
            (Some(start), Some(end), _) => (start, end),
            (_, _, Some(offsets)) => (offsets.from / 1000.0, offsets.to / 1000.0),
            _ => {
                return Err(ClipscribeError::ExternalToolFailed(format!(
                    "whisper segment {} carries no timing information",
                    index
                )));
            }
        };

        let confidence = seg
            .confidence
            .or_else(|| seg.avg_logprob.map(|logprob| logprob.exp().clamp(0.0, 1.0)));

        segments.push(RawSegment {
            start,
            end,
            text: seg.text.trim().to_string(),
            confidence,
        });
    }

    let text = match raw.text {
        Some(text) => text.trim().to_string(),
        None => segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    };

    let language = raw.language.unwrap_or_else(|| {
        if requested_language == AUTO_DETECT {
            "unknown".to_string()
        } else {
            requested_language.to_string()
        }
    });

    let duration = raw.duration.or_else(|| segments.last().map(|s| s.end));

    Ok(EngineResult {
        text,
        language,
        duration,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds_timing() {
        let json = r#"{
            "text": " Hello world. ",
            "language": "en",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " Hello", "avg_logprob": -0.2},
                {"id": 1, "start": 1.5, "end": 2.75, "text": " world.", "avg_logprob": -0.4}
            ]
        }"#;

        let result = parse_engine_output(json, AUTO_DETECT).unwrap();
        assert_eq!(result.text, "Hello world.");
        assert_eq!(result.language, "en");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].start, 0.0);
        assert_eq!(result.segments[1].end, 2.75);
        assert_eq!(result.duration, Some(2.75));

        // avg_logprob becomes a confidence in [0, 1]
        let confidence = result.segments[0].confidence.unwrap();
        assert!(confidence > 0.0 && confidence <= 1.0);
    }

    #[test]
    fn test_parse_millisecond_offsets_normalize_to_seconds() {
        let json = r#"{
            "language": "de",
            "segments": [
                {"offsets": {"from": 0, "to": 1234}, "text": "eins"},
                {"offsets": {"from": 1234, "to": 2500}, "text": "zwei"}
            ]
        }"#;

        let result = parse_engine_output(json, "de").unwrap();
        assert_eq!(result.segments[0].end, 1.234);
        assert_eq!(result.segments[1].start, 1.234);
        assert_eq!(result.segments[1].end, 2.5);
        assert_eq!(result.text, "eins zwei");
    }

    #[test]
    fn test_segment_without_timing_is_rejected() {
        let json = r#"{"segments": [{"text": "floating"}]}"#;
        let err = parse_engine_output(json, AUTO_DETECT).unwrap_err();
        assert!(matches!(err, ClipscribeError::ExternalToolFailed(_)));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = parse_engine_output("not json at all", AUTO_DETECT).unwrap_err();
        assert!(matches!(err, ClipscribeError::ExternalToolFailed(_)));
    }

    #[test]
    fn test_zero_segments_is_valid_silent_audio() {
        let result = parse_engine_output(r#"{"text": "", "segments": []}"#, "en").unwrap();
        assert!(result.segments.is_empty());
        assert_eq!(result.language, "en");
    }

    #[test]
    fn test_model_size_parsing() {
        assert_eq!(ModelSize::from_str("base").unwrap(), ModelSize::Base);
        assert_eq!(ModelSize::from_str("Large").unwrap(), ModelSize::Large);

        let err = ModelSize::from_str("enormous").unwrap_err();
        assert!(matches!(err, ClipscribeError::InvalidArgument(_)));
    }
}
