use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod cli;
mod config;
mod engine;
mod error;
mod fetcher;
mod output;
mod pipeline;
mod process;
mod store;
mod utils;

use catalog::YoutubeCatalog;
use cli::{Cli, Commands};
use config::Config;
use engine::{ModelSize, WhisperEngine};
use fetcher::{AudioFetcher, DirectUrlFetcher, YtDlpFetcher};
use pipeline::TranscriptionPipeline;
use process::Supervisor;
use store::{SqliteTranscriptStore, TranscriptReader, TranscriptStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "clipscribe=debug"
    } else {
        "clipscribe=info"
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;

    match cli.command {
        Commands::Transcribe {
            video_id,
            language,
            model,
            dry_run,
            format,
            output,
        } => {
            // Check for required external dependencies
            let missing_deps = utils::check_dependencies(
                &config.tools.yt_dlp_path,
                &config.tools.whisper_path,
            )
            .await;
            if !missing_deps.is_empty() {
                eprintln!("{} Dependency check warnings:", style("!").yellow());
                for dep in missing_deps {
                    eprintln!("   - {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            let model = ModelSize::from_str(
                model.as_deref().unwrap_or(&config.pipeline.default_model),
            )?;
            let language = language.unwrap_or_else(|| config.pipeline.default_language.clone());

            let supervisor = Arc::new(Supervisor::with_kill_grace(config.kill_grace()));
            let fetcher: Arc<dyn AudioFetcher> = if fetcher::is_direct_media_url(&video_id) {
                Arc::new(DirectUrlFetcher::new())
            } else {
                Arc::new(YtDlpFetcher::new(
                    supervisor.clone(),
                    config.tools.yt_dlp_path.clone(),
                    config.download_timeout(),
                ))
            };
            let engine = Arc::new(WhisperEngine::new(
                supervisor.clone(),
                config.tools.whisper_path.clone(),
                model,
                config.transcribe_timeout(),
            ));

            let pool = config.open_pool().await?;
            SqliteTranscriptStore::init_schema(&pool).await?;
            let store = Arc::new(SqliteTranscriptStore::new(pool));

            let pipeline = TranscriptionPipeline::new(
                Arc::new(YoutubeCatalog::new()),
                fetcher,
                engine,
                store,
            );

            let cancel = cancellation_for(config.pipeline_deadline());
            let progress = spinner(cli.quiet, "Transcribing...");

            tracing::info!("starting transcription for video: {}", video_id);

            let rendered = if dry_run {
                let result = pipeline.dry_run(&cancel, &video_id, &language).await;
                finish_spinner(&progress, &result);
                output::render_engine_result(&result?, &format)?
            } else {
                let result = pipeline.create_transcription(&cancel, &video_id, &language).await;
                finish_spinner(&progress, &result);
                let outcome = result?;
                output::render_transcript(&outcome.transcript, &outcome.segments, &format)?
            };

            match output {
                Some(path) => {
                    output::save_to_file(&rendered, &path)?;
                    println!("Transcription saved to: {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
        Commands::Get { id, format, output } => {
            let pool = config.open_pool().await?;
            SqliteTranscriptStore::init_schema(&pool).await?;
            let store = SqliteTranscriptStore::new(pool);

            let (transcript, segments) = store.get(&id).await?;
            let rendered = output::render_transcript(&transcript, &segments, &format)?;

            match output {
                Some(path) => {
                    output::save_to_file(&rendered, &path)?;
                    println!("Transcript saved to: {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
        Commands::List { video_id } => {
            let pool = config.open_pool().await?;
            SqliteTranscriptStore::init_schema(&pool).await?;
            let store = SqliteTranscriptStore::new(pool);

            let transcripts = store.list_by_video(&video_id).await?;
            if transcripts.is_empty() {
                println!("No transcripts for video {}", video_id);
            }
            for transcript in transcripts {
                let status = match transcript.status {
                    TranscriptStatus::Completed => style(transcript.status).green(),
                    TranscriptStatus::Failed => style(transcript.status).red(),
                    _ => style(transcript.status).yellow(),
                };
                let duration = transcript
                    .total_duration
                    .map(utils::format_duration)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<12}  {:<5}  {}  {}",
                    transcript.id,
                    status,
                    transcript.language,
                    transcript.created_at.format("%Y-%m-%d %H:%M:%S"),
                    duration
                );
            }
        }
        Commands::Delete { id } => {
            let pool = config.open_pool().await?;
            SqliteTranscriptStore::init_schema(&pool).await?;
            let store = SqliteTranscriptStore::new(pool);

            store.delete(&id).await?;
            println!("Deleted transcript {}", id);
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written; edit it to change tool paths or timeouts.");
            }
        }
    }

    Ok(())
}

/// Cancellation token wired to ctrl-c and the overall pipeline deadline
fn cancellation_for(deadline: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling pipeline");
            interrupt.cancel();
        }
    });

    let expiry = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        tracing::warn!("pipeline deadline of {:?} expired", deadline);
        expiry.cancel();
    });

    cancel
}

fn spinner(quiet: bool, message: &str) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(120));
    Some(progress)
}

fn finish_spinner<T, E>(progress: &Option<ProgressBar>, result: &std::result::Result<T, E>) {
    if let Some(progress) = progress {
        if result.is_ok() {
            progress.finish_with_message("Transcription complete");
        } else {
            progress.finish_with_message("Transcription failed");
        }
    }
}
