use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle states of a transcription attempt.
///
/// `pending → downloading → transcribing → persisting → completed`, with
/// `failed` reachable from any non-terminal state. The orchestrator owns
/// all transitions; the store never moves a row on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Pending,
    Downloading,
    Transcribing,
    Persisting,
    Completed,
    Failed,
}

impl TranscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptStatus::Pending => "pending",
            TranscriptStatus::Downloading => "downloading",
            TranscriptStatus::Transcribing => "transcribing",
            TranscriptStatus::Persisting => "persisting",
            TranscriptStatus::Completed => "completed",
            TranscriptStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscriptStatus::Completed | TranscriptStatus::Failed)
    }
}

impl std::fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted header record for one (video, language) transcription attempt
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transcript {
    pub id: String,
    pub video_id: String,
    pub language: String,
    pub status: TranscriptStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub detected_language: Option<String>,
    pub total_duration: Option<f64>,
}

/// One ordered, timed span of recognized speech belonging to a transcript
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Segment {
    pub id: i64,
    pub transcript_id: String,
    pub sequence_index: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Segment data ready to persist; sequence indices are assigned by the
/// store from slice order, so they are gap-free by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub confidence: Option<f64>,
}
