use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use waav_voice_call::CallConfig;
use waav_voice_call::core::audio::{self, AudioInput, AudioOutput, NullOutput, WavFileInput};
use waav_voice_call::core::realtime::transcript::speaker_label;
use waav_voice_call::core::realtime::{CallState, ChannelTranscriptSink, SessionController};

/// WaaV Voice Call - talk to a realtime voice agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "waav-voice-call")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `call`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place a call
    Call {
        /// Stream a WAV file instead of the microphone
        #[arg(long = "input-wav", value_name = "FILE")]
        input_wav: Option<PathBuf>,

        /// Discard agent audio instead of playing it
        #[arg(long = "null-output")]
        null_output: bool,
    },

    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Call {
        input_wav: None,
        null_output: false,
    });

    let (input_wav, null_output) = match command {
        Commands::Devices => {
            let (inputs, outputs) = audio::list_devices()?;
            println!("Input devices:");
            for name in inputs {
                println!("  {name}");
            }
            println!("Output devices:");
            for name in outputs {
                println!("  {name}");
            }
            return Ok(());
        }
        Commands::Call {
            input_wav,
            null_output,
        } => (input_wav, null_output),
    };

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        CallConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        CallConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let input: Arc<dyn AudioInput> = match input_wav {
        Some(path) => Arc::new(WavFileInput::new(path)),
        None => audio::default_input(config.input_device.clone())?,
    };
    let output: Arc<dyn AudioOutput> = if null_output {
        Arc::new(NullOutput)
    } else {
        audio::default_output(config.output_device.clone())?
    };

    let (transcripts, mut turns) = ChannelTranscriptSink::channel();
    let session = SessionController::from_config(&config, input, output, Arc::new(transcripts))?;
    let mut status = session.subscribe();

    info!(call_id = session.id(), "Starting call to {}", config.realtime_url);
    session.start()?;
    println!("Connecting... type 'm' + Enter to toggle mute, 'q' + Enter to hang up.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_state = CallState::Idle;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.end();
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.state != last_state {
                    println!("[{}]", current.state);
                    last_state = current.state;
                }
                match current.state {
                    CallState::Ended => {
                        if let Some(error) = current.last_error {
                            warn!("Call ended with error: {error}");
                        }
                        break;
                    }
                    CallState::Idle => {
                        let error = current
                            .last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "call did not connect".to_string());
                        return Err(anyhow!(error));
                    }
                    _ => {}
                }
            }

            Some(turn) = turns.recv() => {
                println!("{}: {}", speaker_label(turn.role), turn.text);
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "m" => {
                            let muted = session.toggle_mute();
                            println!("{}", if muted { "Muted" } else { "Unmuted" });
                        }
                        "q" => session.end(),
                        "" => {}
                        other => println!("Unknown command '{other}'. Use 'm' or 'q'."),
                    },
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
        }
    }

    session.end();
    println!("Call ended");
    Ok(())
}
