use thiserror::Error;

/// Link open/read/write failures. Fatal only when opening the port at startup.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },
    #[error("serial read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("serial write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("link closed")]
    Closed,
}

/// A malformed inbound frame. Always dropped and counted, never escalated.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("frame is not valid utf-8")]
    NotUtf8,
    #[error("empty frame")]
    Empty,
    #[error("non-numeric token {0:?}")]
    NonNumeric(String),
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("non-finite value on channel {channel}")]
    NonFinite { channel: usize },
    #[error("{len} bytes without a line terminator")]
    Overlong { len: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("cutoff {cutoff_hz} Hz must lie strictly between 0 and Nyquist ({nyquist_hz} Hz)")]
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("window of {actual} samples is too short, need more than {required}")]
    InsufficientLength { required: usize, actual: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("channel {channel}: no interior cycles ({crossings} crossings detected)")]
    NoInteriorCycles { channel: usize, crossings: usize },
    #[error("channel {channel}: empty trace")]
    EmptyTrace { channel: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate {value} Hz outside [{min}, {max}]")]
    SampleRateOutOfRange { value: f64, min: f64, max: f64 },
    #[error("time base {value} s/div outside [{min}, {max}]")]
    TimeBaseOutOfRange { value: f64, min: f64, max: f64 },
    #[error("cutoff {value} Hz must lie strictly between 0 and Nyquist ({nyquist} Hz)")]
    CutoffOutOfRange { value: f64, nyquist: f64 },
    #[error("display window of {capacity} samples is shorter than the filter needs ({min})")]
    WindowTooShort { capacity: usize, min: usize },
    #[error("need a full rolling window before calibrating ({have}/{need} samples)")]
    NotEnoughData { have: usize, need: usize },
    #[error(transparent)]
    Filter(#[from] FilterError),
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("nothing to plot: {0}")]
    Empty(&'static str),
    #[error("failed to render plot: {0}")]
    Render(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PlotError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        PlotError::Render(format!("{value:?}"))
    }
}

impl From<image::ImageError> for PlotError {
    fn from(value: image::ImageError) -> Self {
        PlotError::Render(value.to_string())
    }
}
