//! Command-line radio.
//!
//! Builds a playlist station from the given files, M3U playlists and
//! directories, runs it as a radio stream and writes the stream (backlog,
//! then live frames) to a file or to stdout:
//!
//! ```text
//! pmoradio --shuffle ~/Music/jazz | mpv -
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pmoconfig::{Config, get_config};
use pmoradio::{
    BacklogReader, CloseReason, FfmpegEncoder, Listener, PlaylistSource, PlaylistStation,
    RadioConfigExt, RadioStream,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Continuous MP3 radio from local playlists
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Audio files, M3U/M3U8 playlists or directories to play
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Station name
    #[arg(short, long, default_value = "PMORadio")]
    name: String,

    /// Shuffle the playlist on every pass
    #[arg(short, long)]
    shuffle: bool,

    /// Configuration directory (default: $PMORADIO_CONFIG, ./.pmoradio, ~/.pmoradio)
    #[arg(short, long)]
    config: Option<String>,

    /// Write the stream to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds between status reports, 0 to disable
    #[arg(long, default_value_t = 30)]
    status_interval: u64,
}

fn init_logging(config: &Config) {
    if !config.get_log_enable_console().unwrap_or(true) {
        return;
    }
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config
            .get_log_min_level()
            .unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level.to_lowercase())
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Writes the backlog, then live data until the listener ends.
async fn pump<W>(mut backlog: BacklogReader, mut listener: Listener, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let head = tokio::io::copy(&mut backlog, output)
        .await
        .context("failed to write backlog")?;
    backlog.close();
    debug!(bytes = head, "backlog written");

    tokio::io::copy(&mut listener, output)
        .await
        .context("failed to write stream")?;

    match listener.close_reason() {
        Some(CloseReason::StationExhausted) => bail!("station exhausted: nothing left to play"),
        Some(CloseReason::Unresponsive) => bail!("output too slow, listener dropped"),
        _ => Ok(()),
    }
}

/// Logs now-playing changes every second and a status line every `interval`.
async fn report(stream: &RadioStream, interval: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut current: Option<String> = None;
    let mut ticks = 0u64;
    loop {
        ticker.tick().await;
        ticks += 1;

        let playing = stream.current();
        if playing.is_some() && playing != current {
            let status = stream.status();
            if let Some(now) = status.current {
                info!(
                    title = %now.name,
                    artist = now.artist.as_deref().unwrap_or(""),
                    album = now.album.as_deref().unwrap_or(""),
                    "now playing"
                );
            }
            current = playing;
        }

        if interval > 0 && ticks % interval == 0 {
            match serde_json::to_string(&stream.status()) {
                Ok(json) => info!(status = %json, "stream status"),
                Err(err) => warn!(error = %err, "failed to serialise status"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(dir) => Arc::new(Config::load_config(dir)?),
        None => get_config(),
    };
    init_logging(&config);

    let options = config.get_radio_stream_options()?;
    let encoder = FfmpegEncoder::new(config.get_radio_encoder_program()?);
    info!(program = encoder.program(), bitrate = options.bitrate, "encoder configured");

    let source = PlaylistSource::from_paths(cli.sources.iter().cloned());
    let station = PlaylistStation::new(cli.name.clone(), source, cli.shuffle);
    let stream = RadioStream::new(cli.name.clone(), Arc::new(station), Arc::new(encoder), options);

    let (listener, backlog) = stream
        .connect()
        .context("stream closed before the first connection")?;

    let mut output: Box<dyn AsyncWrite + Unpin + Send> = match &cli.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let result = tokio::select! {
        result = pump(backlog, listener, &mut output) => result,
        _ = report(&stream, cli.status_interval) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };

    stream.shutdown();
    stream.stopped().await;
    output.flush().await?;
    result
}
