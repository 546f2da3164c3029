//! Screen-capture bridge between Combat Mission and an RL agent.
//!
//! The game offers no API, so the bridge observes pixels and acts through
//! synthetic input. Subcommands cover calibration (`list-windows`,
//! `capture`, `calibrate`, `test`), human-gameplay recording (`record`),
//! and a random-policy environment drive (`play`).

mod calibrate;
mod capture;
mod config;
mod env;
mod grid;
mod input;
mod ocr;
mod recorder;

use crate::capture::{FrameSource, ScreenGrabber};
use crate::config::Config;
use crate::env::CombatEnv;
use crate::grid::GridMapper;
use crate::input::InputController;
use crate::ocr::{ScoreReader, ScoreSource};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

#[derive(Parser)]
#[command(name = "cm-bridge", version, about = "Combat Mission screen bridge")]
struct Cli {
    /// Path to the JSON config file (defaults are used when it is missing)
    #[arg(short, long, default_value = "cm-bridge.json")]
    config: PathBuf,

    /// Directory holding the .rten OCR models (default: ~/.cache/ocrs/)
    #[arg(long)]
    ocr_models: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe capture, input, grid, and OCR availability
    Test,
    /// Write a starter config file with the default values
    InitConfig,
    /// List visible windows for calibrating the window region
    ListWindows,
    /// Capture the configured region once and save it as PNG
    Capture {
        #[arg(short, long, default_value = "capture.png")]
        output: PathBuf,
    },
    /// Capture a frame with the action grid and score region drawn on top
    Calibrate {
        #[arg(short, long, default_value = "calibration.png")]
        output: PathBuf,
    },
    /// Record human gameplay as frame snapshots plus an action log
    Record {
        #[arg(short, long, default_value = "recordings")]
        output_dir: PathBuf,
        /// Capture a frame on every keypress too, not just on clicks
        #[arg(long)]
        capture_on_keys: bool,
    },
    /// Drive the environment with a random policy
    Play {
        #[arg(short, long, default_value_t = 1)]
        episodes: u32,
        /// Random actions issued per turn before ending it
        #[arg(long, default_value_t = 8)]
        actions_per_turn: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let load = || Config::load_or_default(&cli.config);

    match &cli.command {
        Command::InitConfig => {
            Config::default().save(&cli.config)?;
            println!("Wrote default config to {}", cli.config.display());
            Ok(())
        }
        Command::Test => cmd_test(&load()?, cli.ocr_models.as_deref()),
        Command::ListWindows => cmd_list_windows(),
        Command::Capture { output } => cmd_capture(&load()?, output),
        Command::Calibrate { output } => cmd_calibrate(&load()?, output),
        Command::Record {
            output_dir,
            capture_on_keys,
        } => cmd_record(&load()?, output_dir, *capture_on_keys),
        Command::Play {
            episodes,
            actions_per_turn,
        } => cmd_play(&load()?, cli.ocr_models.as_deref(), *episodes, *actions_per_turn),
    }
}

/// Component self-test: bind every backend once and report what works.
fn cmd_test(config: &Config, ocr_models: Option<&Path>) -> Result<()> {
    println!("Window region: {:?}", config.window);
    println!("Grid: {}x{}", config.grid.rows, config.grid.cols);

    let mut grabber = ScreenGrabber::new(config.window, &config.window_title)?;
    println!("Capture strategy: {}", grabber.strategy_name());
    match grabber.capture() {
        Some(frame) => println!("Probe capture: {}x{}", frame.width(), frame.height()),
        None => println!("Probe capture: FAILED (no frame)"),
    }

    match InputController::new(config.hotkeys.clone()) {
        Ok(_) => println!("Input backend: ok"),
        Err(e) => println!("Input backend: FAILED ({e})"),
    }

    let mapper = GridMapper::new(config.window, config.grid)?;
    let center = mapper.to_screen(config.grid.rows / 2, config.grid.cols / 2);
    println!(
        "Grid center cell -> screen ({}, {}), {} actions total",
        center.0,
        center.1,
        mapper.cell_count() + env::SHORTCUT_ACTIONS
    );

    match ScoreReader::new(ocr_models, config.score_region) {
        Ok(_) => println!("OCR: ok"),
        Err(e) => println!("OCR: unavailable ({e})"),
    }

    Ok(())
}

fn cmd_list_windows() -> Result<()> {
    let windows = xcap::Window::all().context("Failed to enumerate windows")?;
    for window in &windows {
        let title = window.title();
        if title.is_empty() {
            continue;
        }
        println!(
            "{:40} {:>5},{:>5}  {}x{}  [{}]",
            title,
            window.x(),
            window.y(),
            window.width(),
            window.height(),
            window.app_name()
        );
    }
    Ok(())
}

fn cmd_capture(config: &Config, output: &Path) -> Result<()> {
    let mut grabber = ScreenGrabber::new(config.window, &config.window_title)?;
    let Some(frame) = grabber.capture() else {
        bail!("Capture failed (strategy: {})", grabber.strategy_name());
    };
    frame
        .save(output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    println!(
        "Saved {}x{} frame to {}",
        frame.width(),
        frame.height(),
        output.display()
    );
    Ok(())
}

fn cmd_calibrate(config: &Config, output: &Path) -> Result<()> {
    let mut grabber = ScreenGrabber::new(config.window, &config.window_title)?;
    let Some(mut frame) = grabber.capture() else {
        bail!("Capture failed (strategy: {})", grabber.strategy_name());
    };
    calibrate::draw_overlay(&mut frame, config)?;
    frame
        .save(output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    println!("Saved calibration overlay to {}", output.display());
    Ok(())
}

fn cmd_record(config: &Config, output_dir: &Path, capture_on_keys: bool) -> Result<()> {
    let grabber = ScreenGrabber::new(config.window, &config.window_title)?;
    let mut recorder = recorder::Recorder::new(grabber, config, output_dir, !capture_on_keys)?;

    let (tx, rx) = mpsc::channel();
    recorder::install_interrupt_handler(tx.clone())?;
    // The hook thread never exits on its own; it dies with the process
    let _listener = recorder::spawn_listener(tx);

    let summary = recorder.run(rx)?;
    println!(
        "Session saved: {} ({} frames, {} actions)",
        summary.session_dir.display(),
        summary.frames,
        summary.records
    );
    Ok(())
}

fn cmd_play(
    config: &Config,
    ocr_models: Option<&Path>,
    episodes: u32,
    actions_per_turn: u32,
) -> Result<()> {
    let grabber = ScreenGrabber::new(config.window, &config.window_title)?;
    let input = InputController::new(config.hotkeys.clone())?;
    let score: Option<Box<dyn ScoreSource>> = match ScoreReader::new(ocr_models, config.score_region)
    {
        Ok(reader) => Some(Box::new(reader)),
        Err(e) => {
            log::warn!("OCR unavailable, rewards will be 0: {e}");
            None
        }
    };

    let mut env = CombatEnv::new(grabber, input, score, config)?;
    let end_turn = env.action_space_size() - 1;
    let mut rng = rand::thread_rng();

    for episode in 0..episodes {
        let (_, info) = env.reset(None)?;
        log::info!("Episode {episode}: reset (turn {})", info.turn);
        let mut total_reward = 0.0;

        'episode: loop {
            // A burst of random orders, then commit the turn
            for _ in 0..actions_per_turn {
                let action = rng.gen_range(0..end_turn);
                let result = env.step(action)?;
                total_reward += result.reward;
                if result.truncated {
                    break 'episode;
                }
            }
            let result = env.step(end_turn)?;
            total_reward += result.reward;
            log::info!(
                "Episode {episode} turn {}: score {}, total reward {total_reward}",
                result.info.turn,
                result.info.score
            );
            if result.truncated {
                break;
            }
        }
        println!("Episode {episode} finished: total reward {total_reward}");
    }
    Ok(())
}
