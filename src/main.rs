//! webcam-streamer entry point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::signal;

use webcam_streamer::app::host_address;
use webcam_streamer::capture::{ProbeOutcome, ProbeRequest};
use webcam_streamer::{logging, AppConfig, Settings, Streamer};

/// Stream USB cameras as MJPEG over HTTP
#[derive(Parser, Debug)]
#[command(name = "webcam-streamer", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check which format, resolution and framerate a camera accepts
    Probe {
        /// Capture device, e.g. /dev/video0
        device: String,

        #[arg(default_value_t = 1280)]
        width: u32,

        #[arg(default_value_t = 720)]
        height: u32,

        #[arg(default_value_t = 30)]
        fps: u32,

        /// Pixel format requested from the device
        #[arg(default_value = "mjpeg")]
        format: String,

        /// ffmpeg executable
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Probe {
            device,
            width,
            height,
            fps,
            format,
            ffmpeg,
        }) => {
            let request = ProbeRequest {
                device,
                width,
                height,
                framerate: fps,
                input_format: format,
                ffmpeg_path: ffmpeg,
            };
            probe(request).await
        }
        None => serve(cli.config).await,
    }
}

async fn serve(path: PathBuf) -> ExitCode {
    let config = match AppConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&Settings::default());
            tracing::error!(path = %path.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.settings);
    tracing::info!(path = %path.display(), "Starting webcam-streamer");

    for rejected in &config.rejected {
        tracing::error!(
            index = rejected.index,
            camera = rejected.name.as_deref().unwrap_or("<unnamed>"),
            error = %rejected.error,
            "Skipping invalid camera"
        );
    }

    let mut streamer = match Streamer::start(&config).await {
        Ok(streamer) => streamer,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", streamer.banner(host_address(config.settings.bind_address)));

    shutdown_signal().await;

    streamer.stop().await;
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn probe(request: ProbeRequest) -> ExitCode {
    let rule = "=".repeat(60);
    println!("{rule}\nCamera probe\n{rule}\n");
    println!("Testing {} with:", request.device);
    println!("  Resolution: {}x{}", request.width, request.height);
    println!("  FPS: {}", request.framerate);
    println!("  Format: {}\n", request.input_format);
    println!("Capturing 10 frames...");
    println!("Command: {}\n", request.command());

    let outcome = match request.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            println!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };

    match &outcome {
        ProbeOutcome::Success {
            elapsed,
            average_fps,
        } => {
            println!(
                "SUCCESS: captured 10 frames in {:.2}s",
                elapsed.as_secs_f64()
            );
            println!("  Average FPS: {average_fps:.1}\n");
            println!("This camera entry should work in config.yaml:\n");
            print!("{}", request.config_snippet("camera_1", 8081));
            if request.input_format != "mjpeg" {
                println!(
                    "\nNOTE: this camera does not deliver MJPEG natively; keep \
                     `input_format: {}` in its entry.",
                    request.input_format
                );
            }
            ExitCode::SUCCESS
        }
        ProbeOutcome::Failed { exit_code, errors } => {
            println!("FAILED (exit code {exit_code:?})");
            for line in errors {
                println!("  {line}");
            }
            println!("\nTry a different format, resolution or framerate.");
            ExitCode::FAILURE
        }
        ProbeOutcome::TimedOut => {
            println!("TIMEOUT: camera not responding");
            ExitCode::FAILURE
        }
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received SIGINT, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
