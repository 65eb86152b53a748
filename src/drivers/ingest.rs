use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::drivers::{FrameDecoder, Sample, SerialLink, TransportError};

const READ_CHUNK: usize = 4096;
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Producer side of the sample queue. Unbounded: a stalled consumer makes it grow.
#[derive(Clone)]
pub struct SampleProducer {
    tx: Sender<Sample>,
}

impl SampleProducer {
    /// Returns `false` once the consumer has gone away.
    pub fn push(&self, sample: Sample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

/// Consumer side, drained completely once per processing tick.
pub struct SampleQueue {
    rx: Receiver<Sample>,
}

impl SampleQueue {
    pub fn drain(&self) -> Vec<Sample> {
        self.rx.try_iter().collect()
    }
}

pub fn sample_queue() -> (SampleProducer, SampleQueue) {
    let (tx, rx) = mpsc::channel();
    (SampleProducer { tx }, SampleQueue { rx })
}

#[derive(Debug, Default)]
pub struct IngestCounters {
    decoded: AtomicU64,
    dropped: AtomicU64,
}

impl IngestCounters {
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Running ingestion worker. Dropping the handle stops and joins the thread.
pub struct IngestHandle {
    running: Arc<AtomicBool>,
    counters: Arc<IngestCounters>,
    join: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Waits for the worker to exit on its own (link closed or flag cleared elsewhere).
    pub fn join(mut self) {
        self.wait();
    }

    /// Clears the running flag; the worker notices at its next read timeout.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wait();
    }

    fn wait(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("ingestion worker panicked");
            }
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.running.store(false, Ordering::SeqCst);
            self.wait();
        }
    }
}

pub fn spawn_worker<L>(
    link: L,
    decoder: FrameDecoder,
    producer: SampleProducer,
    running: Arc<AtomicBool>,
) -> std::io::Result<IngestHandle>
where
    L: SerialLink + 'static,
{
    let counters = Arc::new(IngestCounters::default());
    let join = {
        let running = Arc::clone(&running);
        let counters = Arc::clone(&counters);
        thread::Builder::new()
            .name("ingest".into())
            .spawn(move || run_worker(link, decoder, producer, &running, &counters))?
    };
    Ok(IngestHandle {
        running,
        counters,
        join: Some(join),
    })
}

fn run_worker<L: SerialLink>(
    mut link: L,
    mut decoder: FrameDecoder,
    producer: SampleProducer,
    running: &AtomicBool,
    counters: &IngestCounters,
) {
    log::debug!("ingestion worker started ({:?})", decoder.format());
    let mut buf = vec![0u8; READ_CHUNK];
    while running.load(Ordering::Relaxed) {
        let n = match link.read_chunk(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(TransportError::Closed) => {
                log::info!("serial link closed, ingestion stopping");
                break;
            }
            Err(e) => {
                log::warn!("{e}");
                thread::sleep(READ_ERROR_BACKOFF);
                continue;
            }
        };
        for frame in decoder.feed(&buf[..n]) {
            match frame {
                Ok(sample) => {
                    counters.decoded.fetch_add(1, Ordering::Relaxed);
                    if !producer.push(sample) {
                        log::debug!("sample queue consumer dropped, ingestion stopping");
                        return;
                    }
                }
                Err(e) => {
                    let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    log::warn!("dropping frame: {e} ({dropped} dropped so far)");
                }
            }
        }
    }
    log::debug!("ingestion worker exited");
}
