use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clipscribe",
    about = "Turn a video identifier into a persisted, segment-level transcript using yt-dlp and Whisper",
    version,
    long_about = "A CLI tool that downloads a video's audio with yt-dlp, transcribes it with a local Whisper model, and stores the transcript and its timed segments in SQLite. Stored transcripts can be listed, exported as subtitles, and deleted."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, transcribe and persist a video
    Transcribe {
        /// Video identifier or full video URL
        #[arg(value_name = "VIDEO_ID")]
        video_id: String,

        /// Language code for transcription, or "auto" to detect
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,

        /// Whisper model size (tiny, base, small, medium, large, turbo)
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,

        /// Run the pipeline without persisting anything
        #[arg(long)]
        dry_run: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show a stored transcript
    Get {
        /// Transcript identifier
        #[arg(value_name = "ID")]
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List stored transcripts for a video, newest first
    List {
        /// Video identifier
        #[arg(value_name = "VIDEO_ID")]
        video_id: String,
    },

    /// Delete a stored transcript and its segments
    Delete {
        /// Transcript identifier
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Plain text
    Text,
    /// JSON with timestamps
    Json,
    /// SRT subtitle format
    Srt,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Srt => write!(f, "srt"),
        }
    }
}
