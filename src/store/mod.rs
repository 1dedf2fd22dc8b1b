use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClipscribeError, Result};

pub mod models;

pub use models::{NewSegment, Segment, Transcript, TranscriptStatus};

/// Write capability over the transcript store, held by the orchestrator.
///
/// The store only ever mutates rows it is explicitly given; it performs
/// no implicit status transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptWriter: Send + Sync {
    /// Create a transcript header. Assigns the identifier and creation
    /// timestamp; the initial status is supplied by the caller. Creating
    /// a second non-failed transcript for the same (video, language) is
    /// a `Conflict`; failed attempts do not block retries.
    async fn create_transcript(
        &self,
        video_id: &str,
        language: &str,
        status: TranscriptStatus,
    ) -> Result<Transcript>;

    async fn set_status(&self, id: &str, status: TranscriptStatus) -> Result<()>;

    /// Write all segments for a transcript in one transaction: either
    /// every row exists afterwards with gap-free sequence indices, or
    /// none do.
    async fn create_segments(
        &self,
        transcript_id: &str,
        segments: &[NewSegment],
    ) -> Result<Vec<Segment>>;

    /// Terminal success: sets status, completion timestamp, detected
    /// language and total duration, and clears any error message.
    async fn mark_completed(
        &self,
        id: &str,
        detected_language: &str,
        total_duration: Option<f64>,
    ) -> Result<Transcript>;

    /// Terminal failure: sets status and the classified error message,
    /// and clears the completion timestamp.
    async fn mark_failed(&self, id: &str, message: &str) -> Result<()>;
}

/// Read/delete capability over the transcript store. Deliberately does
/// not expose any way to run or mutate a transcription.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptReader: Send + Sync {
    /// Fetch a transcript and its segments, ordered by sequence index
    /// ascending. Unknown ids are `NotFound`.
    async fn get(&self, id: &str) -> Result<(Transcript, Vec<Segment>)>;

    /// All transcripts for a video, newest-first. Unknown videos yield
    /// an empty list, not an error.
    async fn list_by_video(&self, video_id: &str) -> Result<Vec<Transcript>>;

    /// Remove a transcript and all its segments in one transaction.
    /// Deleting an unknown id is a `NotFound` error, not a no-op.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// SQLite-backed transcript store.
///
/// The pool is provisioned by the configuration layer; the store never
/// opens connections itself.
pub struct SqliteTranscriptStore {
    pool: SqlitePool,
}

impl SqliteTranscriptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist. Idempotent.
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transcripts (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL,
                language TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT,
                detected_language TEXT,
                total_duration REAL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transcript_id TEXT NOT NULL
                    REFERENCES transcripts(id) ON DELETE CASCADE,
                sequence_index INTEGER NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                text TEXT NOT NULL,
                confidence REAL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // one live attempt per (video, language); failed rows don't count
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transcripts_active
                ON transcripts(video_id, language) WHERE status != 'failed'
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_segments_sequence
                ON segments(transcript_id, sequence_index)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TranscriptWriter for SqliteTranscriptStore {
    async fn create_transcript(
        &self,
        video_id: &str,
        language: &str,
        status: TranscriptStatus,
    ) -> Result<Transcript> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transcripts \
             WHERE video_id = ? AND language = ? AND status != 'failed'",
        )
        .bind(video_id)
        .bind(language)
        .fetch_one(&self.pool)
        .await?;

        if active > 0 {
            return Err(ClipscribeError::Conflict(format!(
                "a non-failed transcript already exists for video {} in language {}",
                video_id, language
            )));
        }

        let transcript = Transcript {
            id: Uuid::new_v4().to_string(),
            video_id: video_id.to_string(),
            language: language.to_string(),
            status,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
            detected_language: None,
            total_duration: None,
        };

        // the partial unique index backstops the check above under races
        sqlx::query(
            "INSERT INTO transcripts \
             (id, video_id, language, status, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&transcript.id)
        .bind(&transcript.video_id)
        .bind(&transcript.language)
        .bind(transcript.status)
        .bind(transcript.created_at)
        .execute(&self.pool)
        .await?;

        debug!("created transcript {} for video {}", transcript.id, video_id);
        Ok(transcript)
    }

    async fn set_status(&self, id: &str, status: TranscriptStatus) -> Result<()> {
        let result = sqlx::query("UPDATE transcripts SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ClipscribeError::NotFound(format!("transcript {}", id)));
        }
        Ok(())
    }

    async fn create_segments(
        &self,
        transcript_id: &str,
        segments: &[NewSegment],
    ) -> Result<Vec<Segment>> {
        let mut tx = self.pool.begin().await?;
        let mut persisted = Vec::with_capacity(segments.len());

        for (index, segment) in segments.iter().enumerate() {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO segments \
                 (transcript_id, sequence_index, start_time, end_time, text, confidence) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(transcript_id)
            .bind(index as i64)
            .bind(segment.start_time)
            .bind(segment.end_time)
            .bind(&segment.text)
            .bind(segment.confidence)
            .fetch_one(&mut *tx)
            .await?;

            persisted.push(Segment {
                id,
                transcript_id: transcript_id.to_string(),
                sequence_index: index as i64,
                start_time: segment.start_time,
                end_time: segment.end_time,
                text: segment.text.clone(),
                confidence: segment.confidence,
            });
        }

        tx.commit().await?;
        debug!(
            "persisted {} segments for transcript {}",
            persisted.len(),
            transcript_id
        );
        Ok(persisted)
    }

    async fn mark_completed(
        &self,
        id: &str,
        detected_language: &str,
        total_duration: Option<f64>,
    ) -> Result<Transcript> {
        let result = sqlx::query(
            "UPDATE transcripts SET \
             status = ?, completed_at = ?, detected_language = ?, \
             total_duration = ?, error_message = NULL \
             WHERE id = ?",
        )
        .bind(TranscriptStatus::Completed)
        .bind(Utc::now())
        .bind(detected_language)
        .bind(total_duration)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ClipscribeError::NotFound(format!("transcript {}", id)));
        }

        let transcript =
            sqlx::query_as::<_, Transcript>("SELECT * FROM transcripts WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(transcript)
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transcripts SET \
             status = ?, error_message = ?, completed_at = NULL \
             WHERE id = ?",
        )
        .bind(TranscriptStatus::Failed)
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ClipscribeError::NotFound(format!("transcript {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl TranscriptReader for SqliteTranscriptStore {
    async fn get(&self, id: &str) -> Result<(Transcript, Vec<Segment>)> {
        let transcript =
            sqlx::query_as::<_, Transcript>("SELECT * FROM transcripts WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| ClipscribeError::NotFound(format!("transcript {}", id)))?;

        let segments = sqlx::query_as::<_, Segment>(
            "SELECT * FROM segments WHERE transcript_id = ? ORDER BY sequence_index ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok((transcript, segments))
    }

    async fn list_by_video(&self, video_id: &str) -> Result<Vec<Transcript>> {
        let transcripts = sqlx::query_as::<_, Transcript>(
            "SELECT * FROM transcripts WHERE video_id = ? \
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transcripts)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM segments WHERE transcript_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM transcripts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ClipscribeError::NotFound(format!("transcript {}", id)));
        }

        tx.commit().await?;
        debug!("deleted transcript {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use std::time::Duration;

    async fn test_store() -> SqliteTranscriptStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        SqliteTranscriptStore::init_schema(&pool).await.unwrap();
        SqliteTranscriptStore::new(pool)
    }

    fn sample_segments() -> Vec<NewSegment> {
        vec![
            NewSegment {
                start_time: 0.0,
                end_time: 1.234,
                text: "a".to_string(),
                confidence: Some(0.9),
            },
            NewSegment {
                start_time: 1.234,
                end_time: 2.5,
                text: "b".to_string(),
                confidence: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_segment_round_trip_preserves_order_and_content() {
        let store = test_store().await;
        let transcript = store
            .create_transcript("vid-1", "en", TranscriptStatus::Persisting)
            .await
            .unwrap();

        let input = sample_segments();
        store.create_segments(&transcript.id, &input).await.unwrap();

        let (_, segments) = store.get(&transcript.id).await.unwrap();
        assert_eq!(segments.len(), input.len());
        for (index, (read, written)) in segments.iter().zip(&input).enumerate() {
            assert_eq!(read.sequence_index, index as i64);
            assert_eq!(read.start_time, written.start_time);
            assert_eq!(read.end_time, written.end_time);
            assert_eq!(read.text, written.text);
            assert_eq!(read.confidence, written.confidence);
        }
    }

    #[tokio::test]
    async fn test_completed_transcript_with_zero_segments_is_valid() {
        let store = test_store().await;
        let transcript = store
            .create_transcript("silent-vid", "en", TranscriptStatus::Persisting)
            .await
            .unwrap();

        store.create_segments(&transcript.id, &[]).await.unwrap();
        let completed = store.mark_completed(&transcript.id, "en", Some(0.0)).await.unwrap();

        assert_eq!(completed.status, TranscriptStatus::Completed);
        let (_, segments) = store.get(&transcript.id).await.unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_active_transcript_conflicts() {
        let store = test_store().await;
        store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();

        let err = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, ClipscribeError::Conflict(_)));

        // a different language is fine
        store
            .create_transcript("vid-1", "de", TranscriptStatus::Pending)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_block_retry() {
        let store = test_store().await;
        let first = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();
        store.mark_failed(&first.id, "network failure").await.unwrap();

        let retry = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();
        assert_ne!(first.id, retry.id);
    }

    #[tokio::test]
    async fn test_delete_removes_header_and_segments() {
        let store = test_store().await;
        let transcript = store
            .create_transcript("vid-1", "en", TranscriptStatus::Persisting)
            .await
            .unwrap();
        store
            .create_segments(&transcript.id, &sample_segments())
            .await
            .unwrap();

        store.delete(&transcript.id).await.unwrap();

        let err = store.get(&transcript.id).await.unwrap_err();
        assert!(matches!(err, ClipscribeError::NotFound(_)));

        let orphans: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM segments WHERE transcript_id = ?")
                .bind(&transcript.id)
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found() {
        let store = test_store().await;
        let err = store.delete("no-such-id").await.unwrap_err();
        assert!(matches!(err, ClipscribeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_video_empty_and_newest_first() {
        let store = test_store().await;
        assert!(store.list_by_video("unknown").await.unwrap().is_empty());

        let first = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();
        store.mark_failed(&first.id, "boom").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();

        let listed = store.list_by_video("vid-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_completed_and_error_are_mutually_exclusive() {
        let store = test_store().await;
        let transcript = store
            .create_transcript("vid-1", "en", TranscriptStatus::Pending)
            .await
            .unwrap();

        store.mark_failed(&transcript.id, "engine exploded").await.unwrap();
        let (failed, _) = store.get(&transcript.id).await.unwrap();
        assert_eq!(failed.status, TranscriptStatus::Failed);
        assert!(failed.completed_at.is_none());
        assert_eq!(failed.error_message.as_deref(), Some("engine exploded"));

        let completed = store.mark_completed(&transcript.id, "en", Some(12.5)).await.unwrap();
        assert!(completed.completed_at.is_some());
        assert!(completed.error_message.is_none());
        assert_eq!(completed.detected_language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_set_status_unknown_id_is_not_found() {
        let store = test_store().await;
        let err = store
            .set_status("ghost", TranscriptStatus::Downloading)
            .await
            .unwrap_err();
        assert!(matches!(err, ClipscribeError::NotFound(_)));
    }
}
