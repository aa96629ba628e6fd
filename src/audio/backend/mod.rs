//! 波形设备后端
//!
//! Ring 通过两个 trait 和硬件打交道：
//! - `WaveDriver`: 设备枚举 + 打开设备
//! - `WaveDevice`: 已打开设备上的 prepare / write / unprepare / close
//!
//! 具体后端在运行时由 `DriverKind` 选择：
//! - winmm: Windows Waveform Audio（仅 Windows）
//! - null: 按实时节拍丢弃数据 / 录入静音
//! - disk: 原始 PCM 写入文件 / 从文件读取
//! - mock: 记录调用的测试设备

use std::fmt;
use std::path::PathBuf;
use std::ptr::NonNull;

use super::completion::CompletionNotifier;
use super::error::DeviceError;
use super::format::{AudioSpec, SampleFormat};

pub mod mock;
pub mod software;
#[cfg(windows)]
pub mod winmm;

/// Ring 本身能处理的样本格式
pub const RING_FORMATS: [SampleFormat; 3] = [
    SampleFormat::U8,
    SampleFormat::S16_SYS,
    SampleFormat::S32_SYS,
];

/// 数据方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Playback,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// 设备选择
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// 系统默认设备
    #[default]
    Default,
    /// 按枚举序号
    Index(usize),
}

/// slot 内存描述
///
/// 设备可以直接从这块内存 DMA / 读写。
/// 有效期：从 prepare 开始，到设备 close 返回为止（ring 保证存储比设备活得久）。
#[derive(Clone, Copy, Debug)]
pub struct SlotMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// 指针只在 slot 归设备所有期间被设备访问
unsafe impl Send for SlotMemory {}

impl SlotMemory {
    pub(crate) fn new(buf: &mut [u8]) -> Self {
        Self {
            // 空 slice 的指针同样非空（dangling 但对齐）
            ptr: NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling()),
            len: buf.len(),
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 打开设备的请求
#[derive(Clone, Debug)]
pub struct OpenRequest {
    pub direction: Direction,
    pub device: DeviceSelector,
    pub spec: AudioSpec,
    pub slot_count: usize,
}

/// 已打开的设备
pub trait WaveDevice: Send {
    /// 注册 slot 内存（硬件 prepare）
    fn prepare(&mut self, slot: usize, memory: SlotMemory) -> Result<(), DeviceError>;

    /// 注销 slot，尽力而为
    fn unprepare(&mut self, slot: usize);

    /// 将 slot 交给设备（播放或填充）
    ///
    /// 不得阻塞；完成时通过 `CompletionNotifier::complete` 通知
    fn write(&mut self, slot: usize, data: &[u8]) -> Result<(), DeviceError>;

    /// 放弃所有在途 slot，并将其标记为完成
    fn reset(&mut self) {}

    /// 关闭设备，尽力而为
    fn close(&mut self);
}

/// 波形设备驱动
pub trait WaveDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 当前平台是否可用
    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, format: SampleFormat) -> bool {
        RING_FORMATS.contains(&format)
    }

    /// 枚举设备名，序号即 `DeviceSelector::Index`
    fn detect_devices(&self, direction: Direction) -> Vec<String>;

    fn open(
        &self,
        request: &OpenRequest,
        notifier: CompletionNotifier,
    ) -> Result<Box<dyn WaveDevice>, DeviceError>;
}

/// 驱动名称（按优先级）
pub const DRIVER_NAMES: [&str; 3] = ["winmm", "disk", "null"];

/// 驱动选择
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverKind {
    WinMm,
    Null,
    Disk {
        path: PathBuf,
        /// 是否按实时节拍读写
        realtime: bool,
    },
}

impl DriverKind {
    /// 当前平台的默认驱动
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::WinMm
        } else {
            Self::Null
        }
    }

    /// 按名称选择驱动
    ///
    /// disk 驱动需要文件路径
    pub fn from_name(name: &str, disk_path: Option<PathBuf>) -> Result<Self, DeviceError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "winmm" => Ok(Self::WinMm),
            "null" | "dummy" => Ok(Self::Null),
            "disk" => {
                let path = disk_path.ok_or_else(|| {
                    DeviceError::Other("disk driver requires a file path".to_string())
                })?;
                Ok(Self::Disk {
                    path,
                    realtime: false,
                })
            }
            other => Err(DeviceError::NotFound(format!("audio driver '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::WinMm => "winmm",
            Self::Null => "null",
            Self::Disk { .. } => "disk",
        }
    }

    /// 创建驱动实例
    pub fn create(&self) -> Result<Box<dyn WaveDriver>, DeviceError> {
        match self {
            #[cfg(windows)]
            Self::WinMm => Ok(Box::new(winmm::WinMmDriver)),
            #[cfg(not(windows))]
            Self::WinMm => Err(DeviceError::DriverUnavailable("winmm")),
            Self::Null => Ok(Box::new(software::NullDriver)),
            Self::Disk { path, realtime } => {
                Ok(Box::new(software::DiskDriver::new(path.clone(), *realtime)))
            }
        }
    }
}

/// 在 `count` 个设备中解析选择
pub(crate) fn resolve_index(selector: DeviceSelector, count: usize) -> Result<usize, DeviceError> {
    match selector {
        DeviceSelector::Default if count > 0 => Ok(0),
        DeviceSelector::Default => Err(DeviceError::NoSuchIndex { index: 0, count }),
        DeviceSelector::Index(index) if index < count => Ok(index),
        DeviceSelector::Index(index) => Err(DeviceError::NoSuchIndex { index, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_name() {
        assert_eq!(DriverKind::from_name("NULL", None).unwrap(), DriverKind::Null);
        assert_eq!(DriverKind::from_name("winmm", None).unwrap(), DriverKind::WinMm);
        assert!(DriverKind::from_name("disk", None).is_err());
        assert!(matches!(
            DriverKind::from_name("disk", Some(PathBuf::from("out.raw"))).unwrap(),
            DriverKind::Disk { .. }
        ));
        assert!(DriverKind::from_name("alsa", None).is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_winmm_unavailable_off_windows() {
        assert!(matches!(
            DriverKind::WinMm.create(),
            Err(DeviceError::DriverUnavailable("winmm"))
        ));
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(DeviceSelector::Default, 2).unwrap(), 0);
        assert_eq!(resolve_index(DeviceSelector::Index(1), 2).unwrap(), 1);
        assert!(resolve_index(DeviceSelector::Index(2), 2).is_err());
        assert!(resolve_index(DeviceSelector::Default, 0).is_err());
    }

    #[test]
    fn test_ring_formats_are_native_integer() {
        for format in RING_FORMATS {
            assert!(!format.is_float());
        }
    }
}
