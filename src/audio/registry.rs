//! 设备注册表
//!
//! 设备列表由调用方显式持有和刷新。每次 refresh 生成一份新的不可变快照，
//! 已分发出去的旧快照不受影响。

use std::sync::Arc;

use super::backend::{DeviceSelector, Direction, WaveDriver};
use super::error::DeviceError;

/// 某一方向的设备列表快照
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    driver: &'static str,
    direction: Direction,
    generation: u64,
    names: Arc<[String]>,
}

impl DeviceSnapshot {
    fn empty(direction: Direction) -> Self {
        Self {
            driver: "",
            direction,
            generation: 0,
            names: Arc::from(Vec::new()),
        }
    }

    pub fn driver(&self) -> &'static str {
        self.driver
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 第几次刷新产生的快照（0 = 从未刷新）
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 按序号取设备名
    pub fn name(&self, index: usize) -> Result<&str, DeviceError> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or(DeviceError::NoSuchIndex {
                index,
                count: self.names.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// 按名称解析为设备选择
    ///
    /// `None` 表示系统默认设备
    pub fn resolve(&self, name: Option<&str>) -> Result<DeviceSelector, DeviceError> {
        match name {
            None => Ok(DeviceSelector::Default),
            Some(wanted) => self
                .names
                .iter()
                .position(|n| n == wanted)
                .map(DeviceSelector::Index)
                .ok_or_else(|| DeviceError::NotFound(wanted.to_string())),
        }
    }
}

/// 设备注册表
pub struct DeviceRegistry {
    playback: DeviceSnapshot,
    capture: DeviceSnapshot,
    generation: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            playback: DeviceSnapshot::empty(Direction::Playback),
            capture: DeviceSnapshot::empty(Direction::Capture),
            generation: 0,
        }
    }

    /// 重新枚举设备，返回新快照
    pub fn refresh(&mut self, driver: &dyn WaveDriver, direction: Direction) -> DeviceSnapshot {
        self.generation += 1;
        let names: Vec<String> = driver.detect_devices(direction);

        log::debug!(
            "Detected {} {} device(s) on {}",
            names.len(),
            direction,
            driver.name()
        );

        let snapshot = DeviceSnapshot {
            driver: driver.name(),
            direction,
            generation: self.generation,
            names: Arc::from(names),
        };

        match direction {
            Direction::Playback => self.playback = snapshot.clone(),
            Direction::Capture => self.capture = snapshot.clone(),
        }
        snapshot
    }

    /// 最近一次刷新的快照
    pub fn snapshot(&self, direction: Direction) -> DeviceSnapshot {
        match direction {
            Direction::Playback => self.playback.clone(),
            Direction::Capture => self.capture.clone(),
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
