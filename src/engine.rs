// src/engine.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::drivers::{
    save_view_png, ConfigChange, IngestCounters, IngestHandle, PlotStyle, SampleQueue,
    ScopePipeline, ScopeView, TickReport,
};
use crate::recorder::{write_snapshot, SummaryLog, STAMP_FORMAT};
use crate::types::{ControlCommand, ScopeEvent};

pub const TICK_HZ: u64 = 30;
const MAX_COMMANDS_PER_TICK: usize = 10;

/// Main loop state: the pipeline plus everything that leaves the process (files, events).
pub struct Engine {
    pipeline: ScopePipeline,
    queue: SampleQueue,
    out_dir: PathBuf,
    channel_names: Vec<String>,
    summary: Option<SummaryLog>,
    plot_style: PlotStyle,
    last_view: Option<ScopeView>,
    ingest: Option<Arc<IngestCounters>>,
    tx: Sender<ScopeEvent>,
}

impl Engine {
    pub fn new(
        mut pipeline: ScopePipeline,
        queue: SampleQueue,
        out_dir: PathBuf,
        tx: Sender<ScopeEvent>,
    ) -> Self {
        pipeline.controller_mut().sync_device();
        let channel_names = pipeline
            .config()
            .channels
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let mut engine = Self {
            pipeline,
            queue,
            out_dir,
            channel_names,
            summary: None,
            plot_style: PlotStyle::default(),
            last_view: None,
            ingest: None,
            tx,
        };
        engine.sync_logging();
        engine
    }

    pub fn pipeline(&self) -> &ScopePipeline {
        &self.pipeline
    }

    /// Decode counters shown by the `status` command.
    pub fn watch_ingest(&mut self, counters: Arc<IngestCounters>) {
        self.ingest = Some(counters);
    }

    pub fn summary_path(&self) -> Option<PathBuf> {
        self.summary.as_ref().map(|s| s.path().to_path_buf())
    }

    /// Runs until `running` is cleared, a quit command arrives, or the worker exits.
    pub fn run(
        &mut self,
        rx_cmd: &Receiver<ControlCommand>,
        running: &AtomicBool,
        worker: &IngestHandle,
    ) {
        self.watch_ingest(worker.counters());
        let period = Duration::from_micros(1_000_000 / TICK_HZ);
        self.emit(ScopeEvent::Log("scope engine ready".to_owned()));
        'main: while running.load(Ordering::Relaxed) {
            let started = Instant::now();
            for _ in 0..MAX_COMMANDS_PER_TICK {
                match rx_cmd.try_recv() {
                    Ok(cmd) => {
                        if !self.handle(cmd) {
                            break 'main;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::debug!("command channel closed");
                        break;
                    }
                }
            }

            let worker_done = worker.is_finished();
            self.tick();
            if worker_done {
                log::info!("ingestion worker stopped, leaving main loop");
                break;
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        self.summary = None;
        self.emit(ScopeEvent::Stopped);
    }

    /// Returns `false` when the command asks the loop to stop.
    pub fn handle(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::Change(change) => match self.pipeline.apply(change) {
                Ok(outcome) => {
                    if change == ConfigChange::ToggleFileLogging {
                        self.sync_logging();
                    }
                    if outcome.window_reset {
                        self.last_view = None;
                    }
                    self.emit(ScopeEvent::Log(format!("applied {change:?}")));
                }
                Err(e) => {
                    log::warn!("rejected {change:?}: {e}");
                    self.emit(ScopeEvent::Log(format!("rejected: {e}")));
                }
            },
            ControlCommand::Calibrate => match self.pipeline.controller_mut().calibrate() {
                Ok(offsets) => {
                    let offsets = offsets.to_vec();
                    self.emit(ScopeEvent::Calibrated(offsets));
                }
                Err(e) => {
                    log::warn!("calibration failed: {e}");
                    self.emit(ScopeEvent::Log(format!("calibration failed: {e}")));
                }
            },
            ControlCommand::Snapshot => {
                log::info!("buffering raw data");
                self.pipeline.request_snapshot();
            }
            ControlCommand::SavePlot => self.save_plot(),
            ControlCommand::Status => self.report_status(),
            ControlCommand::Quit => return false,
        }
        true
    }

    /// One processing pass over whatever the worker queued since the last call.
    pub fn tick(&mut self) -> TickReport {
        let mut report = self.pipeline.tick(&self.queue);
        for window in &mut report.completed {
            if let Some(raw) = window.snapshot.take() {
                match write_snapshot(&self.out_dir, &raw, &self.channel_names) {
                    Ok(path) => self.emit(ScopeEvent::SnapshotSaved(path)),
                    Err(e) => log::error!("failed to save snapshot: {e:#}"),
                }
            }
            if let Some(summary) = &mut self.summary {
                if let Err(e) = summary.write_record(&window.record) {
                    log::error!("failed to write statistics row: {e:#}");
                }
            }
            self.emit(ScopeEvent::Statistics(window.record.clone()));
        }
        if let Some(view) = &report.view {
            self.last_view = Some(view.clone());
            self.emit(ScopeEvent::View(view.clone()));
        }
        report
    }

    fn sync_logging(&mut self) {
        let wanted = self.pipeline.config().file_logging;
        if wanted && self.summary.is_none() {
            match SummaryLog::create(&self.out_dir, &self.channel_names) {
                Ok(log) => self.summary = Some(log),
                Err(e) => log::error!("cannot open statistics log: {e:#}"),
            }
        } else if !wanted && self.summary.take().is_some() {
            log::info!("statistics logging stopped");
        }
        self.emit(ScopeEvent::LoggingStatus(self.summary.is_some()));
    }

    fn save_plot(&mut self) {
        let Some(view) = &self.last_view else {
            log::warn!("nothing to plot yet, the display window is still filling");
            return;
        };
        let path = self
            .out_dir
            .join(format!("{}_scope.png", Local::now().format(STAMP_FORMAT)));
        let saved = std::fs::create_dir_all(&self.out_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| save_view_png(view, &self.plot_style, &path));
        match saved {
            Ok(()) => self.emit(ScopeEvent::PlotSaved(path)),
            Err(e) => log::error!("failed to save plot: {e:#}"),
        }
    }

    fn report_status(&self) {
        let config = self.pipeline.config();
        let buffer = self.pipeline.controller().buffer();
        let mut line = format!(
            "rate {} Hz, cutoff {:.2} Hz, {} s/div, buffer {}/{}, window {}/{}",
            config.sample_rate_hz,
            config.cutoff_hz,
            config.time_base_s,
            buffer.len(),
            buffer.capacity(),
            self.pipeline.aggregator().pending(),
            self.pipeline.aggregator().window_len(),
        );
        if let Some(counters) = &self.ingest {
            line.push_str(&format!(
                ", decoded {} dropped {}",
                counters.decoded(),
                counters.dropped()
            ));
        }
        if let Some(f) = self.last_view.as_ref().and_then(|v| v.dominant_hz) {
            line.push_str(&format!(", dominant {f:.2} Hz"));
        }
        log::info!("{line}");
        self.emit(ScopeEvent::Log(line));
    }

    fn emit(&self, event: ScopeEvent) {
        self.tx.send(event).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::codec::AsciiScale;
    use crate::drivers::{
        sample_queue, spawn_worker, FrameDecoder, FrameFormat, ManualLink, RecordingSink, Sample,
        ScopeConfig,
    };
    use crate::recorder::read_summary;
    use std::f64::consts::PI;
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    fn ascii_stream(n: usize) -> Vec<u8> {
        let scale = AsciiScale::default();
        let mut out = Vec::new();
        for i in 0..n {
            let t = i as f64 / 500.0;
            let x = (2.0 * PI * 5.0 * t + 0.3).sin();
            let y = 0.5 * (2.0 * PI * 5.0 * t).sin();
            let line = format!(
                "{} {} {} 2000\r\n",
                scale.to_raw(x),
                scale.to_raw(y),
                scale.to_raw(1.0)
            );
            out.extend_from_slice(line.as_bytes());
        }
        out
    }

    #[test]
    fn serial_stream_to_summary_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let pipeline = ScopePipeline::new(ScopeConfig::default(), Box::new(sink.clone())).unwrap();
        let (producer, queue) = sample_queue();
        let (tx, rx) = channel();
        let mut engine = Engine::new(pipeline, queue, dir.path().to_path_buf(), tx);
        let summary = engine.summary_path().unwrap();

        let bytes = ascii_stream(2500);
        let link = ManualLink::new(bytes.chunks(777).map(<[u8]>::to_vec));
        let running = Arc::new(AtomicBool::new(true));
        let worker = spawn_worker(
            link,
            FrameDecoder::new(FrameFormat::default()),
            producer,
            Arc::clone(&running),
        )
        .unwrap();
        let (_cmd_tx, cmd_rx) = channel();
        engine.run(&cmd_rx, &running, &worker);
        worker.join();

        assert_eq!(sink.sent(), vec!["2000".to_string()]);
        let rows = read_summary(&summary).unwrap();
        assert_eq!(rows.len(), 1);
        let fields = &rows[0].1;
        let x_mean = fields[0].unwrap();
        assert!((x_mean - 2.0).abs() < 0.02, "{x_mean}");
        assert!((fields[2].unwrap() - 1.0).abs() < 0.02);
        assert_eq!(fields[4], Some(1.0));
        assert_eq!(fields[6], Some(2000.0));

        let events: Vec<ScopeEvent> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, ScopeEvent::Statistics(_))));
        assert!(matches!(events.last(), Some(ScopeEvent::Stopped)));
    }

    fn quiet_engine(
        dir: &std::path::Path,
        config: ScopeConfig,
    ) -> (Engine, crate::drivers::SampleProducer) {
        let pipeline = ScopePipeline::new(config, Box::new(RecordingSink::new())).unwrap();
        let (producer, queue) = sample_queue();
        let (tx, _rx) = channel();
        (Engine::new(pipeline, queue, dir.to_path_buf(), tx), producer)
    }

    fn small_config() -> ScopeConfig {
        ScopeConfig {
            data_sample_len: 100,
            use_triggering: false,
            time_base_s: 0.04,
            file_logging: false,
            ..ScopeConfig::default()
        }
    }

    fn push_sine(producer: &crate::drivers::SampleProducer, n: usize) {
        for i in 0..n {
            let x = (2.0 * PI * 5.0 * i as f64 / 500.0).sin();
            producer.push(Sample::new(vec![x, x, 0.0], Some(2000.0)));
        }
    }

    #[test]
    fn snapshot_and_plot_land_in_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, producer) = quiet_engine(dir.path(), small_config());
        assert!(engine.summary_path().is_none());

        assert!(engine.handle(ControlCommand::Snapshot));
        push_sine(&producer, 100);
        let report = engine.tick();
        assert_eq!(report.completed.len(), 1);
        assert!(report.view.is_some());
        assert!(engine.handle(ControlCommand::SavePlot));

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names.iter().any(|n| n.ends_with("_raw_snapshot.csv")));
        assert!(names.iter().any(|n| n.ends_with("_scope.png")));
    }

    #[test]
    fn logging_toggle_opens_and_closes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _producer) = quiet_engine(dir.path(), small_config());
        engine.handle(ControlCommand::Change(ConfigChange::ToggleFileLogging));
        assert!(engine.summary_path().is_some());
        engine.handle(ControlCommand::Change(ConfigChange::ToggleFileLogging));
        assert!(engine.summary_path().is_none());
    }

    #[test]
    fn rejected_change_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _producer) = quiet_engine(dir.path(), small_config());
        assert!(engine.handle(ControlCommand::Change(ConfigChange::SampleRate(1.0))));
        assert_eq!(engine.pipeline().config().sample_rate_hz, 500.0);
        assert!(engine.handle(ControlCommand::Calibrate));
        assert!(engine.handle(ControlCommand::Status));
        assert!(!engine.handle(ControlCommand::Quit));
    }

    #[test]
    fn status_reports_decode_counters() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ScopePipeline::new(small_config(), Box::new(RecordingSink::new())).unwrap();
        let (producer, queue) = sample_queue();
        let (tx, rx) = channel();
        let mut engine = Engine::new(pipeline, queue, dir.path().to_path_buf(), tx);

        let link = ManualLink::new(vec![b"807500 807500 807500 1\nnoise\n".to_vec()]);
        let worker = spawn_worker(
            link,
            FrameDecoder::new(FrameFormat::default()),
            producer,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        engine.watch_ingest(worker.counters());
        worker.join();

        assert!(engine.handle(ControlCommand::Status));
        let status = rx.try_iter().find_map(|e| match e {
            ScopeEvent::Log(line) if line.starts_with("rate ") => Some(line),
            _ => None,
        });
        let status = status.unwrap();
        assert!(status.contains("decoded 1 dropped 1"), "{status}");
    }
}
