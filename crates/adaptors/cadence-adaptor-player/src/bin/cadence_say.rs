//! Speak text through a Cadence bridge server
//!
//! Usage:
//!   cargo run -p cadence-adaptor-player --features cli,device --bin cadence-say -- "Hello there"
//!   cadence-say --reference me.wav --reference-text "What I said" "Hello in my voice"

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::error;

use cadence_adaptor_player::{
    AudioOutput, PlaybackOrchestrator, PlayerCallbacks, PlayerOptions, RenderDriver, SpeechRequest,
};
use cadence_core::logging::init_tracing;
use cadence_core::load_env;

#[derive(Parser, Debug)]
#[command(name = "cadence-say")]
#[command(about = "Stream synthesized speech from a Cadence server and play it")]
struct Args {
    /// Text to speak
    text: String,

    /// Bridge server base URL
    #[arg(long, env = "CADENCE_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// WAV file with the voice to clone
    #[arg(long, requires = "reference_text")]
    reference: Option<PathBuf>,

    /// Transcript of the reference clip
    #[arg(long)]
    reference_text: Option<String>,

    /// Where to write the final WAV
    #[arg(short, long, default_value = "speech.wav")]
    output: PathBuf,

    /// Seconds of audio to buffer before playback starts
    #[arg(long, default_value_t = 1.0)]
    buffer: f64,

    /// Stream sample rate
    #[arg(long, default_value_t = cadence_core::DEFAULT_OUTPUT_SAMPLE_RATE)]
    sample_rate: u32,
}

fn driver() -> RenderDriver {
    #[cfg(feature = "device")]
    {
        RenderDriver::Device
    }
    #[cfg(not(feature = "device"))]
    {
        RenderDriver::Headless
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut request = SpeechRequest::new(args.text);
    if let Some(path) = &args.reference {
        let wav = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read reference {}", path.display()))?;
        request = request.with_reference(wav, args.reference_text.clone().unwrap_or_default());
    }

    let options = PlayerOptions {
        sample_rate: args.sample_rate,
        buffer_threshold_secs: args.buffer,
        ..PlayerOptions::default()
    };
    let orchestrator =
        PlaybackOrchestrator::new(&args.server, AudioOutput::default_output().clone(), options)
            .with_driver(driver());

    let callbacks = PlayerCallbacks::new()
        .on_progress(|bytes| {
            print!("\rreceived {:>8} bytes", bytes);
            let _ = std::io::stdout().flush();
        })
        .on_buffering_complete(|| {
            println!();
            println!("buffered; playing");
        });

    let outcome = tokio::select! {
        outcome = orchestrator.play(request, callbacks) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel();
            anyhow::bail!("Interrupted");
        }
    };

    println!();
    println!(
        "{:.2}s of audio ({} bytes) in {:.2}s",
        outcome.audio_secs(),
        outcome.bytes_received,
        outcome.duration.as_secs_f64()
    );

    tokio::fs::write(&args.output, &outcome.wav)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("wrote {}", args.output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("cadence_say=info,cadence_adaptor_player=warn");
    load_env()?;

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
