use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rgbd_grabber::calibration::CalibrationStore;
use rgbd_grabber::config::GrabberConfig;
use rgbd_grabber::device::{DeviceProvider, DeviceSession, ReplayProvider, SyntheticConfig, SyntheticProvider};
use rgbd_grabber::grabber::{Command, Grabber};
use rgbd_grabber::registration::CpuRegistrar;
use rgbd_grabber::sink::OutputSinks;
use rgbd_grabber::sync::{FrameSynchronizer, StopHandle, stop_channel};
use rgbd_grabber::visualization::RerunSink;

#[derive(Debug, Clone)]
enum DeviceArg {
    Synthetic,
    Replay(PathBuf),
}

fn parse_device(s: &str) -> Result<DeviceArg, String> {
    match s.split_once(':') {
        None if s == "synthetic" => Ok(DeviceArg::Synthetic),
        Some(("replay", path)) if !path.is_empty() => Ok(DeviceArg::Replay(PathBuf::from(path))),
        _ => Err(format!("expected `synthetic` or `replay:<path>`, got `{s}`")),
    }
}

#[derive(Parser)]
#[command(version, about, author)]
struct RgbdgCli {
    /// grabber config json, unset fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// folder holding calib_color.json, calib_ir.json, calib_pose.json, calib_depth.json
    #[arg(long)]
    calib_dir: Option<PathBuf>,

    /// synthetic or replay:<folder>
    #[arg(long, value_parser = parse_device, default_value = "synthetic")]
    device: DeviceArg,

    /// open the first device whose uri contains this
    #[arg(long)]
    uri: Option<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    no_combine: bool,

    /// process color on a second thread
    #[arg(long)]
    color_worker: bool,

    /// spawn a rerun viewer
    #[arg(long)]
    rerun: bool,

    /// save a rerun recording instead of spawning a viewer
    #[arg(long, conflicts_with = "rerun")]
    save: Option<PathBuf>,

    #[arg(long)]
    max_frames: Option<u64>,

    /// replay frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

fn load_config(cli: &RgbdgCli) -> Result<GrabberConfig, rgbd_grabber::GrabberError> {
    let mut config = match &cli.config {
        Some(path) => GrabberConfig::load(path)?,
        None => GrabberConfig::default(),
    };
    if let Some(dir) = &cli.calib_dir {
        config.calibration_dir = dir.clone();
    }
    if let Some(uri) = &cli.uri {
        config.device_uri = Some(uri.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.wait_timeout_ms = timeout_ms;
    }
    if cli.no_combine {
        config.combine_enabled = false;
    }
    if cli.color_worker {
        config.color_worker = true;
    }
    config.validate()?;
    Ok(config)
}

fn output_sinks(cli: &RgbdgCli) -> Result<OutputSinks, rerun::RecordingStreamError> {
    let builder = rerun::RecordingStreamBuilder::new("rgbd-grabber");
    let recording = if let Some(path) = &cli.save {
        builder.save(path)?
    } else if cli.rerun {
        builder.spawn()?
    } else {
        return Ok(OutputSinks::default());
    };
    Ok(OutputSinks {
        combined: Box::new(RerunSink::new(recording.clone(), "camera/combined")),
        depth: Box::new(RerunSink::new(recording.clone(), "camera/depth")),
        preview: Box::new(RerunSink::new(recording, "camera/preview")),
    })
}

/// Reads `q`, `s`, `c` lines from stdin. Quitting also wakes the synchronizer.
fn spawn_command_reader(stop: StopHandle) -> crossbeam_channel::Receiver<Command> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = std::thread::Builder::new()
        .name("commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let Some(command) = Command::parse(&line) else {
                    log::warn!("unknown command {:?}, use q, s or c", line.trim());
                    continue;
                };
                if tx.send(command).is_err() {
                    break;
                }
                if command == Command::Quit {
                    stop.stop();
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("no command input: {e}");
    }
    rx
}

fn run(cli: RgbdgCli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    let calibration = CalibrationStore::new(&config.calibration_dir).load();
    let sinks = output_sinks(&cli)?;
    let mut grabber = Grabber::new(config.clone(), &calibration, Box::new(CpuRegistrar::new()), sinks)?;

    let provider: Box<dyn DeviceProvider> = match &cli.device {
        DeviceArg::Synthetic => Box::new(SyntheticProvider::new(SyntheticConfig {
            depth_size: config.depth_size,
            color_size: config.color_size,
            ..SyntheticConfig::default()
        })),
        DeviceArg::Replay(root) => Box::new(ReplayProvider::new(root, cli.fps)),
    };
    let mut session = DeviceSession::open(provider.as_ref(), &config)?;

    let (stop, signal) = stop_channel();
    let sync = FrameSynchronizer::new(config.wait_timeout(), signal);
    let commands = spawn_command_reader(stop);

    let frames = grabber.run(session.streams_mut(), &sync, Some(&commands), cli.max_frames)?;
    log::info!(
        "{frames} frames captured from {}, {} published",
        session.info().uri,
        grabber.frames_published()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = RgbdgCli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
