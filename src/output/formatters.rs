use serde_json::json;

use crate::engine::EngineResult;
use crate::error::{ClipscribeError, Result};
use crate::store::{Segment, Transcript};

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`).
///
/// Whole seconds are truncated out of the value; milliseconds come from
/// the fractional remainder, rounded to the nearest millisecond.
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_milliseconds = (seconds * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render persisted segments as SRT: 1-based index, comma millisecond
/// separator, block order matching sequence index.
pub fn format_as_srt(segments: &[Segment]) -> String {
    format_srt_blocks(
        segments
            .iter()
            .map(|s| (s.start_time, s.end_time, s.text.as_str())),
    )
}

/// Render a dry-run engine result as SRT, identical block shape
pub fn format_engine_result_as_srt(result: &EngineResult) -> String {
    format_srt_blocks(
        result
            .segments
            .iter()
            .map(|s| (s.start, s.end, s.text.as_str())),
    )
}

fn format_srt_blocks<'a, I>(spans: I) -> String
where
    I: Iterator<Item = (f64, f64, &'a str)>,
{
    let mut srt = String::new();
    for (index, (start, end, text)) in spans.enumerate() {
        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_timestamp(start),
            format_srt_timestamp(end),
            text
        ));
    }
    srt
}

/// Plain text: the recognized speech, one segment per line
pub fn format_as_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_engine_result_as_text(result: &EngineResult) -> String {
    if result.text.is_empty() {
        result
            .segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        result.text.clone()
    }
}

/// JSON: the persisted header plus ordered segments
pub fn format_as_json(transcript: &Transcript, segments: &[Segment]) -> Result<String> {
    serde_json::to_string_pretty(&json!({
        "transcript": transcript,
        "segments": segments,
    }))
    .map_err(|e| ClipscribeError::StorageFailure(format!("failed to serialize transcript: {}", e)))
}

pub fn format_engine_result_as_json(result: &EngineResult) -> Result<String> {
    serde_json::to_string_pretty(result)
        .map_err(|e| ClipscribeError::StorageFailure(format!("failed to serialize result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawSegment;

    fn segment(index: i64, start: f64, end: f64, text: &str) -> Segment {
        Segment {
            id: index + 1,
            transcript_id: "t-1".to_string(),
            sequence_index: index,
            start_time: start,
            end_time: end,
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn test_format_srt_timestamp_table() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(59.999), "00:00:59,999");
        assert_eq!(format_srt_timestamp(3661.5), "01:01:01,500");
        assert_eq!(format_srt_timestamp(1.234), "00:00:01,234");
        assert_eq!(format_srt_timestamp(2.5), "00:00:02,500");
    }

    #[test]
    fn test_srt_export_exact_output() {
        let segments = vec![segment(0, 0.0, 1.234, "a"), segment(1, 1.234, 2.5, "b")];

        assert_eq!(
            format_as_srt(&segments),
            "1\n00:00:00,000 --> 00:00:01,234\na\n\n2\n00:00:01,234 --> 00:00:02,500\nb\n\n"
        );
    }

    #[test]
    fn test_dry_run_srt_matches_persisted_shape() {
        let result = EngineResult {
            text: "a b".to_string(),
            language: "en".to_string(),
            duration: Some(2.5),
            segments: vec![
                RawSegment {
                    start: 0.0,
                    end: 1.234,
                    text: "a".to_string(),
                    confidence: None,
                },
                RawSegment {
                    start: 1.234,
                    end: 2.5,
                    text: "b".to_string(),
                    confidence: None,
                },
            ],
        };

        let segments = vec![segment(0, 0.0, 1.234, "a"), segment(1, 1.234, 2.5, "b")];
        assert_eq!(format_engine_result_as_srt(&result), format_as_srt(&segments));
    }

    #[test]
    fn test_srt_of_no_segments_is_empty() {
        assert_eq!(format_as_srt(&[]), "");
    }

    #[test]
    fn test_text_joins_segments() {
        let segments = vec![segment(0, 0.0, 1.0, "hello"), segment(1, 1.0, 2.0, "world")];
        assert_eq!(format_as_text(&segments), "hello\nworld");
    }
}
