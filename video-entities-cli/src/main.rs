use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use video_entities::prelude::*;
use video_entities_cli::{Cli, context};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // logging is configured by the loaded document, so failures here go to stderr
    let mut config = match AppConfig::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("video-entities: {}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply_logging(&mut config.logging);

    let guard = match video_entities::logging::init(&config.logging, Some(config.seq.seq_url.as_str())) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("video-entities: failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = video_entities::VERSION,
        env = %config.env,
        videos = cli.videos.len(),
        seq = guard.ships_to_seq(),
        "starting video entities"
    );

    let code = match context::run(config, &cli.videos).await {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                videos = summary.videos,
                records = summary.records,
                files = summary.files.len(),
                "video entities complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "video entities failed");
            ExitCode::FAILURE
        }
    };

    guard.flush().await;
    code
}
