//! Command line arguments

use clap::Parser;
use video_entities::config::{LogFormat, LogLevel, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "video-entities")]
#[command(about = "Extract named entities from video titles, descriptions and captions", long_about = None)]
#[command(version = video_entities::VERSION)]
pub struct Cli {
    /// Video ids to process when the run state lists no staged files
    #[arg(long, num_args = 1..)]
    pub videos: Vec<String>,

    /// Verbose output (debug level logging)
    #[arg(long, short)]
    pub verbose: bool,

    /// Console log format (default, compact, pretty, json)
    #[arg(long, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Apply the logging flags on top of the loaded configuration.
    pub fn apply_logging(&self, logging: &mut LoggingConfig) {
        if self.verbose {
            logging.level = LogLevel::Debug;
        }
        if let Some(format) = self.log_format {
            logging.format = format;
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
