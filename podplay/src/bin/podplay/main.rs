//! podplay - écoute d'un épisode de podcast depuis l'URL de son flux.

mod cli;
mod terminal;

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use podaudio::{AudioOutput, CpalOutput, NullOutput, PlaybackError, list_output_devices};
use podconfig::{Config, get_config};
use podnet::{FetchSettings, HttpFetcher};
use podplay::{Outcome, PipelineError, PipelineState, Player, PlayerSettings};
use podutils::PODPLAY_VERSION;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Command, Options};
use crate::terminal::TerminalSelector;

fn main() -> ExitCode {
    let options = match cli::parse_args(env::args().skip(1)) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            println!("{}", cli::usage());
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("podplay {PODPLAY_VERSION}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{}", format!("error: {err}").red());
            eprintln!("{}", cli::usage());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{}", format!("error: cannot start the runtime: {err}").red());
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(async {
        match run(options).await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("{}", format!("error: {err:#}").red());
                ExitCode::FAILURE
            }
        }
    });
    // Un sélecteur abandonné peut encore attendre une touche
    runtime.shutdown_timeout(Duration::from_millis(200));
    code
}

async fn run(options: Options) -> Result<ExitCode> {
    let config = match &options.config_dir {
        Some(dir) => Arc::new(Config::load_config(dir)?),
        None => get_config()?,
    };
    cli::init_tracing(&config.get_log_min_level()?);

    let fetcher = HttpFetcher::new(FetchSettings {
        user_agent: config.get_user_agent()?,
        connect_timeout: Duration::from_millis(config.get_connect_timeout_ms()?),
        read_timeout: Duration::from_millis(config.get_read_timeout_ms()?),
        max_redirects: config.get_max_redirects()?,
    })
    .context("cannot build the HTTP client")?;

    let output: Arc<dyn AudioOutput> = if options.null_output {
        Arc::new(NullOutput::new())
    } else {
        let device = match options.device.clone() {
            Some(device) => Some(device),
            None => config.get_playback_device()?,
        };
        Arc::new(
            CpalOutput::new()
                .with_device(device)
                .with_volume(config.get_playback_volume()?),
        )
    };

    let player = Player::new(fetcher, output).with_settings(PlayerSettings {
        channel_size: config.get_channel_size()?,
        chunk_duration_ms: config.get_chunk_duration_ms()? as u64,
        buffer_ms: config.get_playback_buffer_ms()? as u64,
    });
    info!(config_dir = %config.dir(), feed = %options.feed_url, "Starting podplay");

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    let mut states = player.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if let PipelineState::Playing { episode } = state {
                eprintln!("{} {}", "Playing".green().bold(), episode);
            }
        }
    });

    match player.run(&options.feed_url, TerminalSelector::new(), token).await {
        Ok(Outcome::Played(episode)) => {
            info!(title = %episode.title, "Episode finished");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Outcome::Cancelled) => {
            eprintln!("{}", "Cancelled.".yellow());
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("{}", format!("error [{}]: {}", failure.stage, failure.error).red());
            if let PipelineError::Playback(PlaybackError::NoDevice(_)) = &failure.error {
                if let Ok(devices) = list_output_devices() {
                    eprintln!("available output devices: {}", devices.join(", "));
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
