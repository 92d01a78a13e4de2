//! Cadence speech bridge server
//!
//! Serves streaming synthesis from a Triton inference server (or the demo
//! backend) over HTTP.
//!
//! Usage:
//!   TTS_SERVER_ADDRESS=triton.local cargo run --bin cadence-server -- --port 3000
//!   TTS_BACKEND=demo cargo run --bin cadence-server

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use cadence_adaptor_web::{AppState, WebServer, WebServerConfig};
use cadence_core::logging::init_tracing;
use cadence_core::{load_env, InferenceConfig};
use cadence_provider_triton::ConfiguredBackendFactory;

#[derive(Parser, Debug)]
#[command(name = "cadence-server")]
#[command(about = "Streaming speech synthesis bridge")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CADENCE_PORT", default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "CADENCE_HOST", default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() {
    init_tracing("cadence_server=info,cadence_adaptor_web=info,cadence_provider_triton=info");

    if let Err(e) = load_env() {
        error!("{}", e);
        std::process::exit(1);
    }

    let args = Args::parse();

    let config = match InferenceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = AppState::new(Arc::new(ConfiguredBackendFactory::new(config)));
    let mut server = WebServer::new(
        WebServerConfig {
            host: args.host,
            port: args.port,
        },
        state,
    );

    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Cadence speech bridge on http://{}", addr);
    println!("  GET  /health");
    println!("  POST /api/text-to-speech   (multipart: text, referenceAudio, referenceText)");
    println!("  POST /api/voice-convert    (multipart: sourceAudio, targetAudio, presetVoice)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    server.stop().await;
}
