//! 有界 slot 环：生产者 ↔ 波形设备
//!
//! 设计：
//! - 固定 N 个定长 slot，打开时一次性分配并向设备注册，生命周期内不改变大小
//! - 生产者按 0..N 轮转填充、提交；设备按提交顺序消费
//! - 唯一的同步点是可用计数器（见 `completion`），初始 N-1
//! - 可选 mlock 防止 page fault
//!
//! 生产者只在 submit 之前写 slot，设备只在 submit 之后、完成通知之前访问，
//! 因此 slot 数据本身不需要锁。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{
    DeviceSelector, Direction, OpenRequest, SlotMemory, WaveDevice, WaveDriver, RING_FORMATS,
};
use super::completion::{
    completion_channel, Availability, CompletionNotifier, Released, RingCloser, SlotFlags,
};
use super::error::RingError;
use super::format::{AudioSpec, SampleFormat};
use super::stats::RingStats;
use super::timing::remaining;

/// 最少 slot 数（N=1 时计数器初始为 0，生产者会永远阻塞）
pub const MIN_SLOTS: usize = 2;

/// 最多 slot 数，更大的请求截到此值
pub const MAX_SLOTS: usize = 256;

/// 最多声道数，超出部分静默截到立体声
pub const MAX_CHANNELS: u16 = 2;

/// Ring 配置
#[derive(Clone, Debug)]
pub struct RingConfig {
    /// slot 数 N
    pub slot_count: usize,
    /// drain 轮询间隔
    pub drain_poll_interval: Duration,
    /// drain 上限（None = 无上限）
    pub drain_timeout: Option<Duration>,
    /// 是否 mlock slot 内存
    pub lock_memory: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            drain_poll_interval: Duration::from_millis(100),
            drain_timeout: None,
            lock_memory: false,
        }
    }
}

/// 打开 ring 的请求
#[derive(Clone, Debug)]
pub struct RingRequest {
    pub direction: Direction,
    pub device: DeviceSelector,
    pub format: SampleFormat,
    pub freq: u32,
    pub channels: u16,
    /// 请求的每 slot 帧数（会被抬到 1/4 秒下限）
    pub samples: u32,
}

impl RingRequest {
    /// 播放方向、默认设备
    pub fn new(format: SampleFormat, freq: u32, channels: u16, samples: u32) -> Self {
        Self {
            direction: Direction::Playback,
            device: DeviceSelector::Default,
            format,
            freq,
            channels,
            samples,
        }
    }

    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }
}

/// 声道数截到 [1, 2]
#[inline]
pub fn clamp_channels(channels: u16) -> u16 {
    channels.clamp(1, MAX_CHANNELS)
}

/// 每 slot 帧数下限：1/4 秒，4 帧对齐
#[inline]
pub fn min_slot_frames(freq: u32, requested: u32) -> u32 {
    let quarter = freq / 4;
    if requested < quarter {
        (quarter + 3) & !3
    } else {
        requested
    }
}

/// 连续的 slot 存储
struct SlotStorage {
    bytes: Box<[u8]>,
    slot_size: usize,
    locked: bool,
}

impl SlotStorage {
    fn allocate(slot_size: usize, slot_count: usize, fill: u8) -> Result<Self, RingError> {
        let total = slot_size
            .checked_mul(slot_count)
            .ok_or(RingError::OutOfMemory { bytes: u64::MAX })?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total)
            .map_err(|_| RingError::OutOfMemory { bytes: total as u64 })?;
        bytes.resize(total, fill);

        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            slot_size,
            locked: false,
        })
    }

    #[inline]
    fn slot(&self, index: usize) -> &[u8] {
        let start = index * self.slot_size;
        &self.bytes[start..start + self.slot_size]
    }

    #[inline]
    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.slot_size;
        &mut self.bytes[start..start + self.slot_size]
    }

    fn memory(&mut self, index: usize) -> SlotMemory {
        SlotMemory::new(self.slot_mut(index))
    }

    /// 锁定 slot 内存，防止被换页
    ///
    /// 返回是否成功锁定
    #[cfg(unix)]
    fn lock(&mut self) -> bool {
        if self.locked || self.bytes.is_empty() {
            return self.locked;
        }

        let ptr = self.bytes.as_ptr() as *const libc::c_void;
        let result = unsafe { libc::mlock(ptr, self.bytes.len()) };

        if result == 0 {
            self.locked = true;
            log::debug!("Slot storage locked: {} bytes", self.bytes.len());
        } else {
            log::warn!(
                "Failed to lock slot storage: {}",
                std::io::Error::last_os_error()
            );
        }
        self.locked
    }

    #[cfg(not(unix))]
    fn lock(&mut self) -> bool {
        log::debug!("Slot storage locking not supported on this platform");
        false
    }

    fn unlock(&mut self) {
        if !self.locked {
            return;
        }
        #[cfg(unix)]
        unsafe {
            libc::munlock(self.bytes.as_ptr() as *const libc::c_void, self.bytes.len());
        }
        self.locked = false;
        log::debug!("Slot storage unlocked");
    }
}

impl Drop for SlotStorage {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// 有界 slot 环
///
/// 单生产者：`get_write_slot` → `submit` → `wait` 严格按序调用。
/// 跨线程只允许通过 `closer()` 唤醒阻塞的 wait。
pub struct SlotRing {
    spec: AudioSpec,
    direction: Direction,
    config: RingConfig,
    slot_count: usize,
    next_write: usize,

    device: Option<Box<dyn WaveDevice>>,
    storage: Option<SlotStorage>,
    prepared: Vec<bool>,

    flags: Arc<SlotFlags>,
    availability: Availability,
    notifier: CompletionNotifier,
    closer: RingCloser,
    stats: Arc<RingStats>,
}

impl SlotRing {
    /// 打开设备并建立 ring
    ///
    /// 任何一步失败都会完整回滚已获取的资源
    pub fn open(
        driver: &dyn WaveDriver,
        request: &RingRequest,
        config: &RingConfig,
    ) -> Result<Self, RingError> {
        let slot_count = config.slot_count.clamp(MIN_SLOTS, MAX_SLOTS);
        if slot_count != config.slot_count {
            log::warn!(
                "Slot count {} clamped to {}",
                config.slot_count,
                slot_count
            );
        }

        // 格式回退由调用方负责，这里只做校验
        let format = request.format;
        if !RING_FORMATS.contains(&format) || !driver.supports(format) {
            return Err(RingError::UnsupportedFormat { requested: format });
        }

        let channels = clamp_channels(request.channels);
        if channels != request.channels {
            log::debug!("Channels {} clamped to {}", request.channels, channels);
        }

        let samples = min_slot_frames(request.freq, request.samples);
        let spec = AudioSpec::new(format, request.freq, channels, samples).ok_or_else(|| {
            RingError::OutOfMemory {
                bytes: (format.bytes_per_sample() as u64)
                    .saturating_mul(channels as u64)
                    .saturating_mul(samples as u64)
                    .saturating_mul(slot_count as u64),
            }
        })?;

        // 存储先于设备分配，失败时无需回滚
        let mut storage = SlotStorage::allocate(spec.size as usize, slot_count, spec.silence)?;
        if config.lock_memory {
            storage.lock();
        }

        let stats = Arc::new(RingStats::new());
        let channel = completion_channel(slot_count, Arc::clone(&stats));

        let open_request = OpenRequest {
            direction: request.direction,
            device: request.device,
            spec,
            slot_count,
        };
        let device = driver
            .open(&open_request, channel.notifier.clone())
            .map_err(RingError::DeviceUnavailable)?;

        let mut ring = Self {
            spec,
            direction: request.direction,
            config: config.clone(),
            slot_count,
            next_write: 0,
            device: Some(device),
            storage: None,
            prepared: vec![false; slot_count],
            flags: channel.flags,
            availability: channel.availability,
            notifier: channel.notifier,
            closer: channel.closer,
            stats,
        };

        for slot in 0..slot_count {
            let memory = storage.memory(slot);
            let result = match ring.device.as_mut() {
                Some(device) => device.prepare(slot, memory),
                None => Ok(()),
            };
            if let Err(source) = result {
                ring.storage = Some(storage);
                ring.close();
                return Err(RingError::PrepareFailed { slot, source });
            }
            ring.prepared[slot] = true;
        }
        ring.storage = Some(storage);

        log::info!(
            "Ring opened on {} ({}): {}Hz {}ch {} | {} slots x {} frames ({} bytes)",
            driver.name(),
            request.direction,
            spec.freq,
            spec.channels,
            spec.format,
            slot_count,
            spec.samples,
            spec.size
        );

        Ok(ring)
    }

    /// 当前写 slot，生产者就地填充
    pub fn get_write_slot(&mut self) -> Result<&mut [u8], RingError> {
        let index = self.next_write;
        let storage = self.storage.as_mut().ok_or(RingError::Closed)?;
        Ok(storage.slot_mut(index))
    }

    /// 将当前写 slot 交给设备并前进，不阻塞
    ///
    /// 设备拒绝时记录警告，slot 立即回收，不会让后续 wait 挂起
    pub fn submit(&mut self) -> Result<(), RingError> {
        let slot = self.next_write;
        let storage = self.storage.as_ref().ok_or(RingError::Closed)?;
        let device = self.device.as_mut().ok_or(RingError::Closed)?;

        self.flags.mark_pending(slot);
        self.stats.record_submit();

        if let Err(e) = device.write(slot, storage.slot(slot)) {
            log::warn!("Device rejected slot {}: {}", slot, e);
            self.stats.record_drop();
            self.notifier.recycle(slot);
        }

        self.next_write = (slot + 1) % self.slot_count;
        Ok(())
    }

    /// 等待一个 slot 可用
    ///
    /// 无超时；ring 被关闭时返回 `WaitAbandoned`
    pub fn wait(&self) -> Result<Released, RingError> {
        self.availability.acquire()
    }

    /// 轮询直到所有 slot 都被设备归还
    ///
    /// 精度受轮询间隔限制；`drain_timeout` 到期返回 `DrainTimedOut`
    pub fn drain(&self) -> Result<(), RingError> {
        if self.device.is_none() {
            return Ok(());
        }

        let deadline = self.config.drain_timeout.map(|t| Instant::now() + t);
        loop {
            let pending = self.flags.pending();
            if pending == 0 {
                return Ok(());
            }

            let sleep = match deadline {
                Some(deadline) => {
                    let left = remaining(deadline);
                    if left.is_zero() {
                        return Err(RingError::DrainTimedOut { pending });
                    }
                    left.min(self.config.drain_poll_interval)
                }
                None => self.config.drain_poll_interval,
            };
            thread::sleep(sleep);
        }
    }

    /// 关闭 ring，可重复调用
    ///
    /// 唤醒阻塞的 wait，注销所有 slot，关闭设备，释放存储。
    /// 调用方需保证生产者已停止（或阻塞在 wait 上）。
    pub fn close(&mut self) {
        self.closer.close();

        let mut released = false;
        if let Some(mut device) = self.device.take() {
            let pending = self.flags.pending();
            if pending > 0 {
                log::warn!("Closing with {} slot(s) still queued, resetting device", pending);
                device.reset();
            }

            for (slot, prepared) in self.prepared.iter_mut().enumerate() {
                if *prepared {
                    device.unprepare(slot);
                    *prepared = false;
                }
            }
            device.close();
            released = true;
        }

        // 存储必须比设备活得久
        if self.storage.take().is_some() {
            released = true;
        }

        if released {
            log::info!("Ring closed");
        }
    }

    /// 已完成 slot 的内容（录音方向读取数据）
    pub fn slot(&self, index: usize) -> Option<&[u8]> {
        let storage = self.storage.as_ref()?;
        (index < self.slot_count).then(|| storage.slot(index))
    }

    /// 跨线程关闭句柄
    pub fn closer(&self) -> RingCloser {
        self.closer.clone()
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn next_write_index(&self) -> usize {
        self.next_write
    }

    /// 仍由设备持有的 slot 数
    pub fn pending_slots(&self) -> usize {
        self.flags.pending()
    }

    /// 可用计数器当前值
    pub fn available(&self) -> usize {
        self.availability.available()
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_none() && self.storage.is_none()
    }

    pub fn is_memory_locked(&self) -> bool {
        self.storage.as_ref().map(|s| s.locked).unwrap_or(false)
    }

    pub fn stats(&self) -> Arc<RingStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for SlotRing {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::mock::{MockConfig, MockDriver};
    use std::sync::mpsc;

    fn config(slots: usize) -> RingConfig {
        RingConfig {
            slot_count: slots,
            ..RingConfig::default()
        }
    }

    fn s16_request() -> RingRequest {
        RingRequest::new(SampleFormat::S16_SYS, 44100, 2, 100)
    }

    #[test]
    fn test_min_slot_frames() {
        assert_eq!(min_slot_frames(44100, 100), 11028);
        assert_eq!(min_slot_frames(48000, 100), 12000);
        assert_eq!(min_slot_frames(22050, 5000), 5512);
        // 已经够大的请求保持不变
        assert_eq!(min_slot_frames(44100, 20000), 20000);
        assert_eq!(min_slot_frames(44100, 11025), 11025);
    }

    #[test]
    fn test_clamp_channels() {
        assert_eq!(clamp_channels(6), 2);
        assert_eq!(clamp_channels(2), 2);
        assert_eq!(clamp_channels(1), 1);
    }

    #[test]
    fn test_open_44100_scenario() {
        let driver = MockDriver::default();
        let ring = SlotRing::open(&driver, &s16_request(), &config(3)).unwrap();

        let spec = ring.spec();
        assert_eq!(spec.samples, 11028);
        assert!(spec.samples >= 44100 / 4);
        assert_eq!(spec.size, 11028 * 2 * 2);
        assert_eq!(ring.slot_count(), 3);
        assert_eq!(driver.ledger().prepares(), 3);
    }

    #[test]
    fn test_open_close_balanced_for_all_formats() {
        for format in RING_FORMATS {
            let driver = MockDriver::default();
            let ledger = driver.ledger();
            let request = RingRequest::new(format, 22050, 1, 1024);

            let mut ring = SlotRing::open(&driver, &request, &config(4)).unwrap();
            assert_eq!(ring.spec().format, format);
            ring.close();

            assert_eq!(ledger.prepares(), 4);
            assert_eq!(ledger.prepared_outstanding(), 0, "format {}", format);
            assert_eq!(ledger.opens(), ledger.closes());
        }
    }

    #[test]
    fn test_channels_clamped_to_stereo() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::S16_SYS, 48000, 6, 4096);
        let ring = SlotRing::open(&driver, &request, &config(2)).unwrap();
        assert_eq!(ring.spec().channels, 2);
        assert_eq!(driver.ledger().last_request().unwrap().spec.channels, 2);
    }

    #[test]
    fn test_unsupported_format_without_fallback() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::F32Lsb, 44100, 2, 4096);
        let result = SlotRing::open(&driver, &request, &config(2));
        assert!(matches!(
            result,
            Err(RingError::UnsupportedFormat {
                requested: SampleFormat::F32Lsb
            })
        ));
        assert_eq!(driver.ledger().opens(), 0);
    }

    #[test]
    fn test_driver_without_format_support() {
        let driver = MockDriver::new(MockConfig {
            formats: vec![SampleFormat::U8],
            ..MockConfig::default()
        });
        let result = SlotRing::open(&driver, &s16_request(), &config(2));
        assert!(matches!(result, Err(RingError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_device_unavailable() {
        let driver = MockDriver::new(MockConfig {
            fail_open: true,
            ..MockConfig::default()
        });
        let result = SlotRing::open(&driver, &s16_request(), &config(2));
        assert!(matches!(result, Err(RingError::DeviceUnavailable(_))));

        let driver = MockDriver::default();
        let request = s16_request().with_device(DeviceSelector::Index(5));
        let result = SlotRing::open(&driver, &request, &config(2));
        assert!(matches!(result, Err(RingError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_prepare_failure_rolls_back() {
        let driver = MockDriver::new(MockConfig {
            fail_prepare_at: Some(2),
            ..MockConfig::default()
        });
        let ledger = driver.ledger();

        let result = SlotRing::open(&driver, &s16_request(), &config(4));
        assert!(matches!(result, Err(RingError::PrepareFailed { slot: 2, .. })));

        assert_eq!(ledger.prepares(), 2);
        assert_eq!(ledger.prepared_outstanding(), 0);
        assert_eq!(ledger.closes(), 1);
    }

    #[test]
    fn test_size_overflow_is_out_of_memory() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::S32_SYS, 44100, 2, u32::MAX);
        let result = SlotRing::open(&driver, &request, &config(2));
        assert!(matches!(result, Err(RingError::OutOfMemory { .. })));
        assert_eq!(driver.ledger().opens(), 0);
    }

    #[test]
    fn test_size_overflow_with_many_slots() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::S32_SYS, 44100, 2, u32::MAX);
        let result = SlotRing::open(&driver, &request, &config(1 << 30));
        assert!(matches!(result, Err(RingError::OutOfMemory { .. })));
        assert_eq!(driver.ledger().opens(), 0);
    }

    #[test]
    fn test_slot_count_capped() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let request = RingRequest::new(SampleFormat::U8, 8000, 1, 2000);
        let mut ring = SlotRing::open(&driver, &request, &config(1 << 40)).unwrap();
        assert_eq!(ring.slot_count(), MAX_SLOTS);
        assert_eq!(ring.available(), MAX_SLOTS - 1);
        assert_eq!(ledger.prepares(), MAX_SLOTS);

        ring.close();
        assert_eq!(ledger.prepared_outstanding(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_memory() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::U8, 8000, 1, 2000);
        let mut ring = SlotRing::open(
            &driver,
            &request,
            &RingConfig {
                lock_memory: true,
                ..config(2)
            },
        )
        .unwrap();

        // mlock 受 RLIMIT_MEMLOCK 限制，失败只记日志
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let queried = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut limit) } == 0;
        if queried && limit.rlim_cur >= 64 * 1024 {
            assert!(ring.is_memory_locked());
        }

        ring.close();
        assert!(!ring.is_memory_locked());
    }

    #[test]
    fn test_slot_count_raised_to_minimum() {
        let driver = MockDriver::default();
        let ring = SlotRing::open(&driver, &s16_request(), &config(1)).unwrap();
        assert_eq!(ring.slot_count(), MIN_SLOTS);
        assert_eq!(ring.available(), MIN_SLOTS - 1);
    }

    #[test]
    fn test_round_robin_write_index() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(3)).unwrap();

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(ring.next_write_index());
            ring.submit().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ledger.writes(), seen);
    }

    #[test]
    fn test_write_slot_is_in_place() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(2)).unwrap();

        let size = ring.spec().size as usize;
        let slot = ring.get_write_slot().unwrap();
        assert_eq!(slot.len(), size);
        slot[0] = 0x7F;
        ring.submit().unwrap();

        assert_eq!(ring.slot(0).unwrap()[0], 0x7F);
        assert_eq!(ledger.written_bytes(), ring.spec().size as usize);
    }

    #[test]
    fn test_n_minus_one_waits_do_not_block_then_nth_blocks() {
        for n in [2usize, 3, 4] {
            let driver = MockDriver::default();
            let ledger = driver.ledger();
            let mut ring = SlotRing::open(&driver, &s16_request(), &config(n)).unwrap();

            for _ in 0..n - 1 {
                ring.submit().unwrap();
                assert_eq!(ring.wait().unwrap(), Released::Credit);
            }
            ring.submit().unwrap();
            assert_eq!(ring.pending_slots(), n);

            let (done_tx, done_rx) = mpsc::channel();
            let handle = thread::spawn(move || {
                let result = ring.wait();
                done_tx.send(()).unwrap();
                (ring, result)
            });

            assert!(
                done_rx.recv_timeout(Duration::from_millis(50)).is_err(),
                "wait {} should block without a completion",
                n
            );

            assert!(ledger.complete(0));
            let (ring, result) = handle.join().unwrap();
            assert_eq!(result.unwrap(), Released::Slot(0));
            assert_eq!(ring.pending_slots(), n - 1);
        }
    }

    #[test]
    fn test_blocked_wait_abandoned_on_close() {
        let driver = MockDriver::default();
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(2)).unwrap();
        ring.submit().unwrap();
        ring.wait().unwrap();
        ring.submit().unwrap();

        let closer = ring.closer();
        let handle = thread::spawn(move || {
            let result = ring.wait();
            ring.close();
            result
        });

        thread::sleep(Duration::from_millis(30));
        closer.close();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(RingError::WaitAbandoned)));
    }

    #[test]
    fn test_double_close_is_noop() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(2)).unwrap();

        ring.close();
        ring.close();
        drop(ring);

        assert_eq!(ledger.closes(), 1);
        assert_eq!(ledger.unprepares(), 2);
    }

    #[test]
    fn test_operations_after_close() {
        let driver = MockDriver::default();
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(2)).unwrap();
        ring.close();

        assert!(ring.is_closed());
        assert!(matches!(ring.get_write_slot(), Err(RingError::Closed)));
        assert!(matches!(ring.submit(), Err(RingError::Closed)));
        assert!(matches!(ring.wait(), Err(RingError::WaitAbandoned)));
        assert!(ring.drain().is_ok());
        assert!(ring.slot(0).is_none());
    }

    #[test]
    fn test_rejected_write_recycles_slot() {
        let driver = MockDriver::new(MockConfig {
            fail_write: true,
            ..MockConfig::default()
        });
        let mut ring = SlotRing::open(&driver, &s16_request(), &config(2)).unwrap();

        ring.submit().unwrap();
        ring.wait().unwrap();
        ring.submit().unwrap();
        // 被拒绝的 slot 已回收，wait 不会阻塞
        assert_eq!(ring.wait().unwrap(), Released::Slot(0));
        assert_eq!(ring.stats().slots_dropped(), 2);
        assert_eq!(ring.pending_slots(), 0);
    }

    #[test]
    fn test_drain_waits_for_completion() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let cfg = RingConfig {
            slot_count: 2,
            drain_poll_interval: Duration::from_millis(5),
            ..RingConfig::default()
        };
        let mut ring = SlotRing::open(&driver, &s16_request(), &cfg).unwrap();
        ring.submit().unwrap();

        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ledger.complete(0);
        });

        ring.drain().unwrap();
        completer.join().unwrap();
        assert_eq!(ring.pending_slots(), 0);
    }

    #[test]
    fn test_drain_timeout() {
        let driver = MockDriver::default();
        let ledger = driver.ledger();
        let cfg = RingConfig {
            slot_count: 2,
            drain_poll_interval: Duration::from_millis(5),
            drain_timeout: Some(Duration::from_millis(20)),
            ..RingConfig::default()
        };
        let mut ring = SlotRing::open(&driver, &s16_request(), &cfg).unwrap();
        ring.submit().unwrap();

        let result = ring.drain();
        assert!(matches!(result, Err(RingError::DrainTimedOut { pending: 1 })));

        // close 时复位设备，把在途 slot 收回
        ring.close();
        assert_eq!(ledger.resets(), 1);
        assert_eq!(ledger.prepared_outstanding(), 0);
    }

    #[test]
    fn test_storage_starts_silent() {
        let driver = MockDriver::default();
        let request = RingRequest::new(SampleFormat::U8, 8000, 1, 2000);
        let mut ring = SlotRing::open(&driver, &request, &config(2)).unwrap();
        assert!(ring.get_write_slot().unwrap().iter().all(|&b| b == 0x80));
    }
}
