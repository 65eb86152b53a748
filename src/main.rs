// src/main.rs
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use clap::Parser;

use serial_scope::args::Args;
use serial_scope::drivers::codec::AsciiScale;
use serial_scope::drivers::{
    sample_queue, spawn_worker, CommandSink, FrameDecoder, FrameFormat, IngestHandle,
    SampleProducer, ScopePipeline, SerialPortLink, SimulatedLink,
};
use serial_scope::engine::Engine;
use serial_scope::settings::Settings;
use serial_scope::types::{ControlCommand, ScopeEvent};

const HELP: &str = "commands: rate <hz> | timebase <s> | cutoff <hz>|nyquist | trigger | filtered \
                    | pause | log | calibrate | snapshot | plot | status | quit";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .parse_default_env()
        .init();

    let settings = Settings::from_args(&args)?;
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let (producer, queue) = sample_queue();
    let (worker, sink) = open_source(&settings, producer, Arc::clone(&running))?;
    let pipeline = ScopePipeline::new(settings.scope.clone(), sink)?;

    let (tx_event, rx_event) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    spawn_console(tx_cmd)?;
    let printer = spawn_printer(rx_event, settings.channel_names())?;

    let mut engine = Engine::new(pipeline, queue, settings.out_dir.clone(), tx_event);
    log::info!("{HELP}");
    engine.run(&rx_cmd, &running, &worker);

    running.store(false, Ordering::SeqCst);
    worker.shutdown();
    drop(engine);
    if printer.join().is_err() {
        log::error!("event printer panicked");
    }
    Ok(())
}

/// Opens the real port or the simulated board and starts the ingestion worker on it.
/// A port that cannot be opened is the one fatal transport error.
fn open_source(
    settings: &Settings,
    producer: SampleProducer,
    running: Arc<AtomicBool>,
) -> anyhow::Result<(IngestHandle, Box<dyn CommandSink>)> {
    if settings.simulate {
        let scale = match &settings.format {
            FrameFormat::AsciiLine { scale, .. } => *scale,
            FrameFormat::Binary { .. } => AsciiScale::default(),
        };
        if settings.sim_tones.len() != settings.scope.channels.len() {
            bail!(
                "{} simulated tones for {} channels",
                settings.sim_tones.len(),
                settings.scope.channels.len()
            );
        }
        let link = SimulatedLink::new(
            settings.sim_tones.clone(),
            scale,
            settings.sim_noise,
            settings.scope.sample_rate_hz,
            settings.read_timeout(),
        );
        let sink: Box<dyn CommandSink> = Box::new(link.command_sink());
        let decoder = FrameDecoder::new(FrameFormat::AsciiLine {
            channels: settings.sim_tones.len(),
            with_delta: true,
            scale,
        });
        log::info!("running against the simulated board");
        let worker = spawn_worker(link, decoder, producer, running)?;
        return Ok((worker, sink));
    }

    let port = settings
        .port
        .as_deref()
        .context("no serial port given (use --port, a settings file, or --simulate)")?;
    let link = SerialPortLink::open(port, settings.baud, settings.read_timeout())?;
    let sink: Box<dyn CommandSink> = Box::new(link.command_sink()?);
    let decoder = FrameDecoder::new(settings.format.clone());
    let worker = spawn_worker(link, decoder, producer, running)?;
    Ok((worker, sink))
}

fn spawn_console(tx: Sender<ControlCommand>) -> std::io::Result<()> {
    // Detached: a blocked stdin read must not hold up shutdown.
    thread::Builder::new().name("console".into()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ControlCommand>() {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{e}; {HELP}"),
            }
        }
    })?;
    Ok(())
}

fn spawn_printer(
    rx: Receiver<ScopeEvent>,
    names: Vec<String>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("printer".into()).spawn(move || {
        for event in rx {
            match event {
                ScopeEvent::Statistics(record) => {
                    let mut line = record.timestamp.format("%H:%M:%S").to_string();
                    for (name, stats) in names.iter().zip(&record.channels) {
                        match stats {
                            Some(s) => {
                                line.push_str(&format!("  {name} {:.3} ± {:.3}", s.mean, s.std))
                            }
                            None => line.push_str(&format!("  {name} -")),
                        }
                    }
                    if let Some(dt) = record.delta_us {
                        line.push_str(&format!("  dT {:.1} us", dt.mean));
                    }
                    println!("{line}");
                }
                ScopeEvent::Log(msg) => println!("{msg}"),
                ScopeEvent::LoggingStatus(on) => {
                    println!("file logging {}", if on { "on" } else { "off" })
                }
                ScopeEvent::SnapshotSaved(path) => println!("snapshot saved to {}", path.display()),
                ScopeEvent::PlotSaved(path) => println!("plot saved to {}", path.display()),
                ScopeEvent::Calibrated(offsets) => println!("offsets {offsets:?}"),
                ScopeEvent::View(_) => {}
                ScopeEvent::Stopped => break,
            }
        }
    })
}
