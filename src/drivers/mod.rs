// src/drivers/mod.rs
// acquisition side: link -> codec -> ingest queue -> pipeline
pub mod buffer;
pub mod codec;
pub mod control;
pub mod error;
pub mod fft;
pub mod filter;
pub mod ingest;
pub mod pipeline;
pub mod plot;
pub mod serial;
pub mod source;
pub mod stats;
pub mod trigger;

pub use buffer::{RollingBuffer, Traces};
pub use codec::{FrameDecoder, FrameFormat};
pub use control::{ApplyOutcome, ChannelSpec, ConfigChange, Controller, ScopeConfig};
pub use error::{ConfigError, DecodeError, FilterError, PlotError, StatsError, TransportError};
pub use filter::ButterworthLowpass;
pub use ingest::{
    sample_queue, spawn_worker, IngestCounters, IngestHandle, SampleProducer, SampleQueue,
};
pub use pipeline::{CompletedWindow, ScopePipeline, ScopeView, TickReport};
pub use plot::{render_view_png, save_view_png, PlotStyle};
pub use serial::{SerialCommandSink, SerialPortLink};
pub use source::{
    CommandSink, ManualLink, RecordingSink, Sample, SerialLink, SimTone, SimulatedLink,
};
pub use stats::{ChannelRole, ChannelStats, StatisticsAggregator, StatisticsRecord};
pub use trigger::TriggerPass;
