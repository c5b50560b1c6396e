use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use gatecount::control::{Command, Direction};
use gatecount::detection::DetectionSource;
use gatecount::{Config, CsvSink, JsonlSource, Pipeline};

#[derive(Parser)]
#[command(
    name = "gatecount",
    about = "Counts tracked objects transiting a configurable gate region",
    version = "0.1.0"
)]
struct Args {
    /// Path to the tracked-detections file (JSON lines)
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the CSV output path from the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Read interactive commands from stdin
    /// (w/a/s/d move, h/l thin/thicken, r reset, n night, z size, q quit)
    #[arg(long)]
    interactive: bool,
}

/// Map one key line from stdin onto a command, original key bindings.
fn parse_key(line: &str, move_step: i32, resize_step: i32) -> Option<Command> {
    match line.trim().chars().next()? {
        'w' => Some(Command::MoveGate(Direction::Up, move_step)),
        's' => Some(Command::MoveGate(Direction::Down, move_step)),
        'a' => Some(Command::MoveGate(Direction::Left, move_step)),
        'd' => Some(Command::MoveGate(Direction::Right, move_step)),
        'h' => Some(Command::ResizeGate(-resize_step)),
        'l' => Some(Command::ResizeGate(resize_step)),
        'r' => Some(Command::Reset),
        'n' => Some(Command::ToggleSensitivity),
        'z' => Some(Command::CycleResolution),
        'q' => Some(Command::Quit),
        _ => None,
    }
}

fn spawn_stdin_commands(tx: Sender<Command>, move_step: i32, resize_step: i32) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            match parse_key(&line, move_step, resize_step) {
                Some(cmd) => {
                    let quit = cmd == Command::Quit;
                    if tx.send(cmd).is_err() || quit {
                        break;
                    }
                }
                None => warn!(input = %line.trim(), "unrecognized command key"),
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatecount=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        Config::from_file(&args.config.to_string_lossy())?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        Config::default()
    };

    let source = JsonlSource::open(&args.input, config.classes.clone())?;
    let (width, height) = source.frame_size();
    info!(width, height, "detection source open");

    let csv_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.csv_path));
    let sink = CsvSink::create(&csv_path)?;
    info!(path = %csv_path.display(), "event sink open");

    let (cmd_tx, cmd_rx) = unbounded();
    if args.interactive {
        spawn_stdin_commands(cmd_tx, config.move_step, config.resize_step);
    } else {
        drop(cmd_tx);
    }

    let mut pipeline = Pipeline::new(&config, (width, height), sink);
    let summary = pipeline.run(
        source,
        &cmd_rx,
        config.queue_capacity,
        Duration::from_millis(config.tick_wait_ms),
    )?;

    info!(
        total = summary.total,
        fps = %format_args!("{:.1}", summary.fps),
        dropped_malformed = summary.dropped_malformed,
        degraded_sink = summary.degraded_sink,
        "session finished"
    );
    println!("TOTAL: {}", summary.total);
    Ok(())
}
