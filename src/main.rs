use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod assembler;
mod config;
mod decode;
mod frame;
mod logger;
mod output;
mod pacing;
mod record;
mod render;
mod server;
mod source;
mod stats;

use config::Config;
use output::SerialOutputs;
use render::{NullSink, RenderSink};
use server::Server;

#[derive(Parser)]
#[command(name = "ledscape-rx")]
#[command(about = "Pixel protocol receiver\n\nReceives OPC over TCP or E1.31 over UDP and draws it onto LED strips.", long_about = None)]
struct Cli {
    /// Path to configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output (per-packet detail)
    #[arg(long, global = true)]
    debug: bool,

    /// Enable detailed debug (state transitions, every draw)
    #[arg(long, global = true)]
    ddebug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive OpenPixelControl over TCP, or replay an OPC recording
    Opc(OpcArgs),
    /// Receive E1.31 (sACN) over UDP
    E131(E131Args),
    /// Replay an OPC recording to a remote OPC server
    Send(SendArgs),
}

#[derive(Args)]
struct LayoutArgs {
    /// LEDs per strip
    #[arg(short = 'c', long = "count", conflicts_with = "dimensions")]
    count: Option<usize>,

    /// LEDs per strip as WxH
    #[arg(short = 'd', long = "dimensions")]
    dimensions: Option<String>,

    /// Fill every LED with this value at startup
    #[arg(short = 't', long = "lamp-test", default_value_t = 0)]
    lamp_test: u8,
}

#[derive(Args)]
struct OpcArgs {
    #[arg(short, long, default_value_t = 7890)]
    port: u16,

    #[command(flatten)]
    layout: LayoutArgs,

    /// Record received pixel commands to this file
    #[arg(short = 'w', long = "write")]
    write: Option<PathBuf>,

    /// Replay this recording instead of listening
    #[arg(short = 'r', long = "read")]
    read: Option<PathBuf>,

    /// Rewind the recording when it ends
    #[arg(short = 'l', long = "loop", requires = "read")]
    looping: bool,

    /// Playback frame rate
    #[arg(short = 'f', long = "frame-rate")]
    frame_rate: Option<u32>,
}

#[derive(Args)]
struct E131Args {
    #[arg(short, long, default_value_t = 5568)]
    port: u16,

    #[command(flatten)]
    layout: LayoutArgs,
}

#[derive(Args)]
struct SendArgs {
    /// OPC recording to replay
    #[arg(short = 'r', long = "read")]
    read: PathBuf,

    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 7890)]
    port: u16,

    #[arg(short = 'f', long = "frame-rate")]
    frame_rate: Option<u32>,

    /// Stop at the end of the recording instead of looping
    #[arg(long)]
    no_loop: bool,
}

impl LayoutArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(count) = self.count {
            config.layout.led_count = count;
        }
        if let Some(dimensions) = &self.dimensions {
            config.layout.led_count = config::parse_dimensions(dimensions)?;
        }
        Ok(())
    }
}

fn open_sink(config: &Config) -> Result<Box<dyn RenderSink>> {
    if config.outputs.is_empty() {
        log::info!("No outputs configured, drawing to nowhere");
        return Ok(Box::new(NullSink::default()));
    }
    Ok(Box::new(SerialOutputs::open(&config.outputs, config.layout.led_count)?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(logger::level_for(cli.debug, cli.ddebug)).context("Failed to install logger")?;

    // Config file first, command-line flags override it below
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut server = match &cli.command {
        Command::Opc(args) => {
            log::info!("OpenPixelControl LEDscape Receiver");
            args.layout.apply(&mut config)?;
            if let Some(rate) = args.frame_rate {
                config.pacing.frame_rate = rate;
            }
            config.validate()?;
            let sink = open_sink(&config)?;
            Server::new(config.clone(), sink)
        }
        Command::E131(args) => {
            log::info!("E1.31 LEDscape Receiver");
            args.layout.apply(&mut config)?;
            config.validate()?;
            let sink = open_sink(&config)?;
            Server::new(config.clone(), sink)
        }
        Command::Send(args) => {
            log::info!("OpenPixelControl File Reader");
            if let Some(rate) = args.frame_rate {
                config.pacing.frame_rate = rate;
            }
            config.validate()?;
            Server::new(config.clone(), Box::new(NullSink::default()))
        }
    };

    // Set up Ctrl-C handler with graceful shutdown
    let running = server.get_running_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Shutting down...");
        running.store(false, std::sync::atomic::Ordering::Relaxed);
    }) {
        log::warn!("Could not set Ctrl-C handler: {}", e);
    }

    // Run until the input ends or Ctrl-C clears the running flag
    match &cli.command {
        Command::Opc(args) => {
            log::info!("LEDs per strip: {}", config.layout.led_count);
            if let Some(path) = &args.write {
                server.record_to(path)?;
            }
            server.lamp_test(args.layout.lamp_test)?;
            match &args.read {
                Some(path) => {
                    server.play(path, args.looping)?;
                }
                None => {
                    log::info!("Port: {}", args.port);
                    log::info!("Ready");
                    server.serve_opc(&format!("0.0.0.0:{}", args.port))?;
                }
            }
        }
        Command::E131(args) => {
            log::info!("LEDs per strip: {}", config.layout.led_count);
            log::info!("Port: {}", args.port);
            server.lamp_test(args.layout.lamp_test)?;
            log::info!("Ready");
            server.serve_e131(&format!("0.0.0.0:{}", args.port))?;
        }
        Command::Send(args) => {
            let addr = format!("{}:{}", args.host, args.port);
            server.send(&args.read, &addr, !args.no_loop)?;
        }
    }

    // Graceful shutdown - send black frames to turn off LEDs
    server.shutdown();

    Ok(())
}
