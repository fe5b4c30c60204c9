use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wakeloop::audio::{MicSource, ReplaySource, SpeakerSink, WavDirSink, rms};
use wakeloop::config::{BufferConfig, HttpDialogConfig};
use wakeloop::dialog::HttpDialogHandler;
use wakeloop::{AudioBuffer, AudioSink, AudioSource, Config, ConversationEnd, DialogSession};

/// Trailing silence appended to replayed recordings so the break detector can fire
const REPLAY_TAIL_MS: u64 = 2000;

/// Wakeloop - hotword-driven voice dialog front end
#[derive(Parser)]
#[command(name = "wakeloop", version, about)]
struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, env = "WAKELOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Override a configuration key (e.g. --set break.detector=rms)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for hotwords and hold conversations (default)
    Run(RunArgs),
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Only react to these keywords
    #[arg(short, long)]
    keyword: Vec<String>,

    /// Replay a WAV file instead of the microphone, for one conversation
    #[arg(long)]
    input: Option<PathBuf>,

    /// Write responses to this directory instead of the speaker
    #[arg(long, env = "WAKELOOP_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,wakeloop=info",
        1 => "info,wakeloop=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let (settings, config) = Config::load(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::ShowConfig) => {
            show_config(&settings, &config);
            Ok(())
        }
        Some(Command::Run(args)) => run(&settings, &config, args).await,
        None => run(&settings, &config, RunArgs::default()).await,
    }
}

#[allow(clippy::future_not_send)]
async fn run(settings: &wakeloop::Settings, config: &Config, args: RunArgs) -> anyhow::Result<()> {
    let handler = HttpDialogHandler::new(HttpDialogConfig::from_settings(settings)?, config.audio);

    let source: Box<dyn AudioSource> = match &args.input {
        Some(path) => Box::new(
            ReplaySource::from_wav_file(path, &config.audio, config.replay_chunk_ms)?
                .with_trailing_silence(&config.audio, REPLAY_TAIL_MS),
        ),
        None => Box::new(MicSource::new(&config.audio)?),
    };

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config.output_directory.as_ref().map(PathBuf::from));
    let sink: Box<dyn AudioSink> = match output_dir {
        Some(dir) => Box::new(WavDirSink::new(dir)?),
        None => Box::new(SpeakerSink::new()?),
    };

    let mut session = DialogSession::from_config(config, source, sink)?;

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            handle.terminate();
        }
    });

    let watch_for: Vec<&str> = args.keyword.iter().map(String::as_str).collect();
    tracing::info!(
        session_id = %session.id(),
        keywords = ?session.keywords(),
        watching = ?watch_for,
        "wakeloop ready"
    );

    if args.input.is_some() {
        session.listen()?;
        let end = session.converse(&handler, &watch_for).await?;
        session.terminate();
        match end {
            ConversationEnd::Completed { turns } => {
                tracing::info!(turns, "replay conversation complete");
            }
            ConversationEnd::Cancelled => tracing::info!("replay conversation cancelled"),
        }
    } else {
        session.run(&handler, &watch_for).await?;
    }

    tracing::info!(stats = ?session.stats(), "session finished");
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let buffer = Arc::new(AudioBuffer::new(
        &config.audio,
        &BufferConfig {
            snapshot_ms: 1000,
            max_capture_ms: None,
        },
    ));
    let mut mic = MicSource::new(&config.audio)?;
    mic.start(Arc::clone(&buffer))?;

    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let pcm = buffer.get_snapshot_data();
        let energy = rms(&pcm, usize::from(config.audio.width)) / 32768.0;

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {:.4} | [{}]", i + 1, energy, meter);
    }

    mic.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try a different audio.sample_rate with --set");

    Ok(())
}

fn show_config(settings: &wakeloop::Settings, config: &Config) {
    if settings.is_empty() {
        println!("# no settings file or overrides; defaults in effect");
    } else {
        println!("# settings");
        for (key, value) in settings.iter() {
            println!("{key} = {value}");
        }
    }
    println!("\n# effective configuration");
    println!("{config:#?}");
}
