//! 音频核心模块
//!
//! 包含：
//! - Ring: 有界 slot 环（生产者 ↔ 波形设备）
//! - Completion: 完成通知与可用计数器
//! - Backend: 波形设备驱动（winmm / null / disk / mock）
//! - Registry: 设备枚举快照
//! - Format: 样本格式、格式回退和规格计算
//! - Timing / Stats: 时间函数和 ring 统计

pub mod backend;
pub mod completion;
pub mod error;
pub mod format;
pub mod registry;
pub mod ring_buffer;
pub mod stats;
pub mod timing;

pub use backend::{DeviceSelector, Direction, DriverKind, WaveDevice, WaveDriver};
pub use completion::{CompletionNotifier, Released, RingCloser};
pub use error::{DeviceError, RingError};
pub use format::{AudioSpec, FormatPolicy, SampleFormat};
pub use registry::{DeviceRegistry, DeviceSnapshot};
pub use ring_buffer::{RingConfig, RingRequest, SlotRing};
pub use stats::{RingStats, StatsReport};
