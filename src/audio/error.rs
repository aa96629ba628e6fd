//! 错误类型

use thiserror::Error;

use super::format::SampleFormat;

/// 设备层错误（由 backend 产生）
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("requested device not found: {0}")]
    NotFound(String),

    #[error("no such device index {index} ({count} devices)")]
    NoSuchIndex { index: usize, count: usize },

    #[error("device is busy")]
    Busy,

    #[error("{call} failed: MMRESULT {code}")]
    Mm { call: &'static str, code: u32 },

    #[error("driver '{0}' is not available on this platform")]
    DriverUnavailable(&'static str),

    #[error("device rejected format {0}")]
    FormatRejected(SampleFormat),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Ring 错误
///
/// 全部同步返回，不做自动重试
#[derive(Debug, Error)]
pub enum RingError {
    #[error("unsupported audio format: {requested} (no usable fallback)")]
    UnsupportedFormat { requested: SampleFormat },

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(#[source] DeviceError),

    #[error("out of memory allocating {bytes} bytes of slot storage")]
    OutOfMemory { bytes: u64 },

    #[error("failed to prepare slot {slot}: {source}")]
    PrepareFailed {
        slot: usize,
        #[source]
        source: DeviceError,
    },

    #[error("wait abandoned: ring closed")]
    WaitAbandoned,

    #[error("drain timed out with {pending} slot(s) still owned by the device")]
    DrainTimedOut { pending: usize },

    #[error("ring is closed")]
    Closed,
}
