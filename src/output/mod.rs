use std::path::Path;

use crate::cli::OutputFormat;
use crate::engine::EngineResult;
use crate::error::{ClipscribeError, Result};
use crate::store::{Segment, Transcript};

pub mod formatters;

pub use formatters::*;

/// Render a persisted transcript in the requested format
pub fn render_transcript(
    transcript: &Transcript,
    segments: &[Segment],
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(segments)),
        OutputFormat::Json => format_as_json(transcript, segments),
        OutputFormat::Srt => Ok(format_as_srt(segments)),
    }
}

/// Render a dry-run engine result in the requested format
pub fn render_engine_result(result: &EngineResult, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_engine_result_as_text(result)),
        OutputFormat::Json => format_engine_result_as_json(result),
        OutputFormat::Srt => Ok(format_engine_result_as_srt(result)),
    }
}

/// Write rendered output to a file
pub fn save_to_file(content: &str, path: &Path) -> Result<()> {
    fs_err::write(path, content)
        .map_err(|e| ClipscribeError::StorageFailure(format!("failed to write output: {}", e)))
}
