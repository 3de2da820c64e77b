//! Livetv binary - play a live tuner stream through the local HLS server
//!
//! Usage:
//! - `livetv <input-url>`: transcode and serve a live MPEG-TS URL
//! - `livetv --lineup <url>`: list the channels of a tuner lineup
//! - `livetv --lineup <url> --channel <number>`: play a channel from the lineup

use livetv::application::find_channel;
use livetv::ports::lineup::LineupSource;
use livetv::{ContentServer, HttpLineup, LivePipeline, PipelineConfig, SessionState, TokioSpawner};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: livetv <input-url> | livetv --lineup <url> [--channel <number>]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Play(String),
    ListChannels { lineup: String },
    PlayChannel { lineup: String, channel: String },
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args {
        [url] if !url.starts_with("--") => Ok(Command::Play(url.clone())),
        [flag, lineup, rest @ ..] if flag == "--lineup" => match rest {
            [] => Ok(Command::ListChannels {
                lineup: lineup.clone(),
            }),
            [channel_flag, channel] if channel_flag == "--channel" => Ok(Command::PlayChannel {
                lineup: lineup.clone(),
                channel: channel.clone(),
            }),
            _ => Err(unexpected(args)),
        },
        [] => Err("missing input".to_string()),
        _ => Err(unexpected(args)),
    }
}

fn unexpected(args: &[String]) -> String {
    format!("unexpected arguments: {}", args.join(" "))
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = PipelineConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livetv=info,tower_http=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(config, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("livetv: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: PipelineConfig, command: Command) -> livetv::Result<()> {
    let input_url = match command {
        Command::Play(url) => url,
        Command::ListChannels { lineup } => {
            for channel in HttpLineup::new()?.fetch(&lineup).await? {
                let flag = if channel.is_hd { "HD" } else { "" };
                println!(
                    "{:>6}  {:<20} {:<3} {}",
                    channel.number, channel.name, flag, channel.playback_url
                );
            }
            return Ok(());
        }
        Command::PlayChannel { lineup, channel } => {
            let channel = find_channel(&HttpLineup::new()?, &lineup, &channel).await?;
            tracing::info!(number = %channel.number, name = %channel.name, "tuning channel");
            channel.playback_url
        }
    };

    // 1. Content server, alive for the whole process
    let state = SessionState::new();
    let server = Arc::new(ContentServer::new(state.clone(), config.cache_max_age_secs));
    let addr = config.bind_addr();
    server.start(&config.workspace_dir, addr).await?;

    // 2. Pipeline
    let pipeline = LivePipeline::new(&config, TokioSpawner::new(), server.clone(), state);

    // 3. Play until interrupted or the request fails
    let played = tokio::select! {
        played = pipeline.play(&input_url) => played,
        _ = tokio::signal::ctrl_c() => Err(livetv::PipelineError::Cancelled),
    };
    let result = match played {
        Ok(url) => {
            println!("{}", url);
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "could not listen for ctrl-c");
            }
            Ok(())
        }
        Err(livetv::PipelineError::Cancelled) => Ok(()),
        Err(e) => Err(e),
    };

    // 4. Teardown
    if let Err(e) = pipeline.teardown().await {
        tracing::warn!(error = %e, "teardown incomplete");
    }
    server.stop().await;
    result
}
