//! sightlined - assistive scene announcer daemon
//!
//! This daemon:
//! 1. Loads configuration (SIGHTLINE_CONFIG file plus env overrides)
//! 2. Wires a frame source, inference engine, scene and speech engine
//! 3. Ticks the assistant at a fixed rate until Ctrl-C
//! 4. Reads commands from stdin ("switch to text recognition",
//!    "start navigation", "dictate find my cup", ...)

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use nalgebra::{Point3, Vector3};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sightline::{
    Assistant, Collaborators, Command, Dictation, HttpRecognizer, InferenceEngine,
    LogOverlay, LogSpeechEngine, LogStatusDisplay, Plane, PlaneScene, SightlineConfig,
    StubEngine, SyntheticSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera source. Only synthetic `stub://` cameras are built in.
    #[arg(long, env = "SIGHTLINE_CAMERA", default_value = "stub://headset")]
    camera: String,
    /// Pipeline ticks per second.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    /// Head yaw change per synthetic frame, in degrees.
    #[arg(long, default_value_t = 0.0)]
    yaw_step: f32,
    /// Distance in meters to the synthetic wall in front of the user.
    #[arg(long, default_value_t = 2.0)]
    wall_distance: f32,
    /// Do not read commands from stdin.
    #[arg(long)]
    no_stdin: bool,
}

/// Dictation through the console: the user types `dictate <phrase>`.
struct ConsoleDictation;

impl Dictation for ConsoleDictation {
    fn start_recording(&mut self) -> Result<()> {
        log::info!("listening: type `dictate <what you are looking for>`");
        Ok(())
    }
}

enum Input {
    Command(Command),
    Dictation(String),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if !args.camera.starts_with("stub://") {
        return Err(anyhow!(
            "camera '{}' is not supported; use a stub:// source",
            args.camera
        ));
    }

    let cfg = SightlineConfig::load()?;
    let settings = cfg.pipeline_settings()?;
    let layout = settings.layout;

    let engine = build_engine(&cfg)?;
    let scene = PlaneScene::new(Point3::origin())
        .with_plane(Plane::new(
            Point3::new(0.0, 0.0, args.wall_distance),
            -Vector3::z(),
        ))
        .with_plane(Plane::new(Point3::new(0.0, -1.6, 0.0), Vector3::y()));
    let source = SyntheticSource::new(layout.sensor_width, layout.sensor_height)
        .with_yaw_step(args.yaw_step);
    let remote = HttpRecognizer::new(&cfg.remote.base_url, cfg.remote.timeout)?;

    let mut assistant = Assistant::new(
        settings,
        Collaborators {
            source: Box::new(source),
            engine,
            scene: Box::new(scene),
            remote: Box::new(remote),
            speech: Box::new(LogSpeechEngine::default()),
            display: Box::new(LogStatusDisplay),
            overlay: Box::new(LogOverlay::default()),
            dictation: Some(Box::new(ConsoleDictation)),
        },
    )?;
    log::info!(
        "sightlined started: camera={} remote={}",
        args.camera,
        cfg.remote.base_url
    );

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let inputs = if args.no_stdin {
        None
    } else {
        Some(spawn_stdin_reader()?)
    };

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let mut ticks = 0u64;
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        if let Some(rx) = &inputs {
            drain_inputs(rx, &mut assistant);
        }

        assistant.tick();
        ticks += 1;
        if args.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    assistant.announcer_mut().stop();
    log::info!(
        "sightlined stopped after {} ticks ({} frames processed)",
        ticks,
        assistant.frames_processed()
    );
    Ok(())
}

fn build_engine(cfg: &SightlineConfig) -> Result<Box<dyn InferenceEngine>> {
    let crop = cfg.sensor.crop_size;
    if let Some(path) = &cfg.detection.model_path {
        #[cfg(feature = "backend-tract")]
        {
            return Ok(Box::new(sightline::TractEngine::new(path, crop)?));
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            return Err(anyhow!(
                "model {} requires the backend-tract feature",
                path.display()
            ));
        }
    }

    // Scripted output: one object at the crop center, one smaller off to the left.
    let classes = cfg.detection.labels.len();
    let second = 1.min(classes - 1);
    let c = crop as f32;
    let output = StubEngine::tensor_from_rows(
        classes,
        &[
            (c / 2.0, c / 2.0, c / 4.0, c / 4.0, 0, 0.85),
            (c / 6.0, c / 2.0, c / 8.0, c / 6.0, second, 0.6),
        ],
    )?;
    log::info!("no model configured, using scripted stub engine");
    Ok(Box::new(StubEngine::new(crop, classes).with_steady_output(output)))
}

fn spawn_stdin_reader() -> Result<Receiver<Input>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let input = match line.strip_prefix("dictate ") {
                    Some(phrase) => Input::Dictation(phrase.to_string()),
                    None => match Command::parse(line) {
                        Some(command) => Input::Command(command),
                        None => {
                            log::warn!("unrecognized command: {}", line);
                            continue;
                        }
                    },
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

/// Apply console input queued since the last tick.
fn drain_inputs(rx: &Receiver<Input>, assistant: &mut Assistant) {
    loop {
        match rx.try_recv() {
            Ok(Input::Command(command)) => assistant.handle_command(command),
            Ok(Input::Dictation(phrase)) => {
                assistant.on_dictation(&phrase);
                assistant.on_dictation_complete(&phrase);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
        }
    }
}
