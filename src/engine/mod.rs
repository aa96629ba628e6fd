//! 设备层
//!
//! 在 slot ring 之上提供回调式设备：
//! - 生产者线程循环：填充（暂停时填静音）→ submit → wait
//! - 录音方向：wait 释放的 slot 交给回调消费
//! - close：唤醒阻塞的 wait，排空在途 slot，释放 ring
//!
//! ring 只在生产者线程上被访问，其他线程只持有关闭句柄和原子状态。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::audio::backend::{Direction, DriverKind, WaveDriver};
use crate::audio::completion::{Released, RingCloser};
use crate::audio::error::{DeviceError, RingError};
use crate::audio::format::{fill_silence, AudioSpec, FormatPolicy, SampleFormat};
use crate::audio::registry::DeviceRegistry;
use crate::audio::ring_buffer::{RingConfig, RingRequest, SlotRing};
use crate::audio::stats::{RingStats, StatsReport};

/// 回调的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// 数据已结束：本次 slot 仍会被提交，然后设备排空并关闭
    Finished,
}

/// 设备回调
///
/// 在生产者线程上调用，不要在其中长时间阻塞
pub trait AudioCallback: Send + 'static {
    /// 播放：填满 `buf`（正好一个 slot）
    fn fill(&mut self, buf: &mut [u8], spec: &AudioSpec) -> Flow {
        fill_silence(spec, buf);
        Flow::Continue
    }

    /// 录音：消费一个录满的 slot
    fn consume(&mut self, data: &[u8], spec: &AudioSpec) -> Flow {
        let _ = (data, spec);
        Flow::Continue
    }
}

/// 闭包形式的播放回调
pub struct PlaybackFn<F>(pub F);

impl<F> AudioCallback for PlaybackFn<F>
where
    F: FnMut(&mut [u8], &AudioSpec) -> Flow + Send + 'static,
{
    fn fill(&mut self, buf: &mut [u8], spec: &AudioSpec) -> Flow {
        (self.0)(buf, spec)
    }
}

/// 闭包形式的录音回调
pub struct CaptureFn<F>(pub F);

impl<F> AudioCallback for CaptureFn<F>
where
    F: FnMut(&[u8], &AudioSpec) -> Flow + Send + 'static,
{
    fn consume(&mut self, data: &[u8], spec: &AudioSpec) -> Flow {
        (self.0)(data, spec)
    }
}

/// 设备配置
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub driver: DriverKind,
    /// 设备名（None = 系统默认）
    pub device: Option<String>,
    pub direction: Direction,
    pub format: SampleFormat,
    pub policy: FormatPolicy,
    pub freq: u32,
    pub channels: u16,
    /// 每 slot 请求的帧数
    pub samples: u32,
    /// 打开后处于暂停状态（输出静音 / 丢弃录音）
    pub start_paused: bool,
    pub ring: RingConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::platform_default(),
            device: None,
            direction: Direction::Playback,
            format: SampleFormat::S16_SYS,
            policy: FormatPolicy::AllowFallback,
            freq: 44100,
            channels: 2,
            samples: 4096,
            start_paused: false,
            ring: RingConfig::default(),
        }
    }
}

/// 设备层错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to spawn audio thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// 生产者线程共享状态
struct DeviceState {
    paused: AtomicBool,
    /// 生产者线程已退出，ring 已释放
    finished: AtomicBool,
}

/// 回调式音频设备
pub struct AudioDevice {
    spec: AudioSpec,
    direction: Direction,
    driver: &'static str,
    state: Arc<DeviceState>,
    stats: Arc<RingStats>,
    closer: RingCloser,
    thread: Option<JoinHandle<()>>,
}

impl AudioDevice {
    /// 按配置选择驱动并打开设备
    pub fn open(config: &DeviceConfig, callback: impl AudioCallback) -> Result<Self, EngineError> {
        let driver = config.driver.create()?;
        if !driver.is_available() {
            return Err(DeviceError::DriverUnavailable(driver.name()).into());
        }
        Self::open_with_driver(driver.as_ref(), config, callback)
    }

    /// 在指定驱动上打开设备
    ///
    /// ring 在调用线程上建立，失败同步返回；成功后启动生产者线程
    pub fn open_with_driver(
        driver: &dyn WaveDriver,
        config: &DeviceConfig,
        callback: impl AudioCallback,
    ) -> Result<Self, EngineError> {
        let mut registry = DeviceRegistry::new();
        let snapshot = registry.refresh(driver, config.direction);
        let selector = snapshot
            .resolve(config.device.as_deref())
            .map_err(RingError::DeviceUnavailable)?;

        let request = RingRequest {
            direction: config.direction,
            device: selector,
            format: config.format,
            freq: config.freq,
            channels: config.channels,
            samples: config.samples,
        };
        let ring = open_with_fallback(driver, request, config.policy, &config.ring)?;

        let spec = *ring.spec();
        let stats = ring.stats();
        let closer = ring.closer();
        let state = Arc::new(DeviceState {
            paused: AtomicBool::new(config.start_paused),
            finished: AtomicBool::new(false),
        });

        let thread_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("wave-ring".to_string())
            .spawn(move || run(ring, callback, thread_state))
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            spec,
            direction: config.direction,
            driver: driver.name(),
            state,
            stats,
            closer,
            thread: Some(thread),
        })
    }

    /// 暂停 / 恢复
    pub fn pause(&self, paused: bool) {
        if self.state.paused.swap(paused, Ordering::AcqRel) != paused {
            log::info!("{}", if paused { "Paused" } else { "Resumed" });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// 回调已结束且设备已释放
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// 实际生效的规格
    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report(self.spec.slot_duration())
    }

    /// 等待回调自行结束（返回 `Flow::Finished`）
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }

    /// 关闭设备，可重复调用
    pub fn close(&mut self) {
        self.closer.close();
        self.join();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// 按格式优先级依次尝试打开 ring
///
/// 只有 `UnsupportedFormat` 会触发回退，其余错误直接返回
fn open_with_fallback(
    driver: &dyn WaveDriver,
    mut request: RingRequest,
    policy: FormatPolicy,
    config: &RingConfig,
) -> Result<SlotRing, RingError> {
    let requested = request.format;
    for format in policy.candidates(requested) {
        request.format = format;
        match SlotRing::open(driver, &request, config) {
            Ok(ring) => {
                if format != requested {
                    log::info!("Format {} not supported, using {}", requested, format);
                }
                return Ok(ring);
            }
            Err(RingError::UnsupportedFormat { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(RingError::UnsupportedFormat { requested })
}

/// 生产者线程主函数
fn run<C: AudioCallback>(mut ring: SlotRing, mut callback: C, state: Arc<DeviceState>) {
    let spec = *ring.spec();
    let direction = ring.direction();
    log::debug!("Audio thread started ({})", direction);

    loop {
        let paused = state.paused.load(Ordering::Acquire);

        let mut flow = Flow::Continue;
        if direction == Direction::Playback {
            match ring.get_write_slot() {
                Ok(buf) if paused => fill_silence(&spec, buf),
                Ok(buf) => flow = callback.fill(buf, &spec),
                Err(_) => break,
            }
        }

        if let Err(e) = ring.submit() {
            log::error!("Submit failed: {}", e);
            break;
        }
        if flow == Flow::Finished {
            break;
        }

        match ring.wait() {
            Ok(Released::Slot(slot)) if direction == Direction::Capture => {
                // 暂停期间录到的数据直接丢弃
                if paused || state.paused.load(Ordering::Acquire) {
                    continue;
                }
                if let Some(data) = ring.slot(slot) {
                    if callback.consume(data, &spec) == Flow::Finished {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(RingError::WaitAbandoned) => break,
            Err(e) => {
                log::error!("Wait failed: {}", e);
                break;
            }
        }
    }

    if direction == Direction::Playback {
        if let Err(e) = ring.drain() {
            log::warn!("{}", e);
        }
    }
    ring.close();

    state.finished.store(true, Ordering::Release);
    log::debug!("Audio thread finished");
}
