//! 记录调用的测试设备
//!
//! 所有调用都记入共享的 `MockLedger`，测试据此检查 prepare/unprepare 是否平衡、
//! 写入顺序，以及手动触发完成通知。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{resolve_index, Direction, OpenRequest, SlotMemory, WaveDevice, WaveDriver, RING_FORMATS};
use crate::audio::completion::CompletionNotifier;
use crate::audio::error::DeviceError;
use crate::audio::format::SampleFormat;

/// Mock 行为配置
#[derive(Clone, Debug)]
pub struct MockConfig {
    /// 设备名列表（播放和录音共用）
    pub devices: Vec<String>,
    /// 设备可接受的格式
    pub formats: Vec<SampleFormat>,
    /// open 时返回 Busy
    pub fail_open: bool,
    /// 在该 slot 上 prepare 失败
    pub fail_prepare_at: Option<usize>,
    /// write 全部失败
    pub fail_write: bool,
    /// write 后立即通知完成
    pub auto_complete: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            devices: vec!["Mock Output".to_string()],
            formats: RING_FORMATS.to_vec(),
            fail_open: false,
            fail_prepare_at: None,
            fail_write: false,
            auto_complete: false,
        }
    }
}

/// 调用记录
#[derive(Default)]
pub struct MockLedger {
    opens: AtomicUsize,
    closes: AtomicUsize,
    prepares: AtomicUsize,
    unprepares: AtomicUsize,
    resets: AtomicUsize,
    writes: Mutex<Vec<usize>>,
    written_bytes: AtomicUsize,
    notifier: Mutex<Option<CompletionNotifier>>,
    last_request: Mutex<Option<OpenRequest>>,
}

impl MockLedger {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn unprepares(&self) -> usize {
        self.unprepares.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// 仍处于 prepare 状态的 slot 数
    pub fn prepared_outstanding(&self) -> isize {
        self.prepares() as isize - self.unprepares() as isize
    }

    /// 按顺序记录的写入 slot
    pub fn writes(&self) -> Vec<usize> {
        self.writes.lock().clone()
    }

    pub fn written_bytes(&self) -> usize {
        self.written_bytes.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<OpenRequest> {
        self.last_request.lock().clone()
    }

    /// 模拟设备完成一个 slot
    ///
    /// 设备尚未打开时返回 false
    pub fn complete(&self, slot: usize) -> bool {
        match self.notifier.lock().as_ref() {
            Some(notifier) => {
                notifier.complete(slot);
                true
            }
            None => false,
        }
    }
}

/// Mock 驱动
pub struct MockDriver {
    config: MockConfig,
    ledger: Arc<MockLedger>,
}

impl MockDriver {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            ledger: Arc::new(MockLedger::default()),
        }
    }

    pub fn ledger(&self) -> Arc<MockLedger> {
        Arc::clone(&self.ledger)
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl WaveDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn description(&self) -> &'static str {
        "Recording mock device"
    }

    fn supports(&self, format: SampleFormat) -> bool {
        self.config.formats.contains(&format)
    }

    fn detect_devices(&self, _direction: Direction) -> Vec<String> {
        self.config.devices.clone()
    }

    fn open(
        &self,
        request: &OpenRequest,
        notifier: CompletionNotifier,
    ) -> Result<Box<dyn WaveDevice>, DeviceError> {
        resolve_index(request.device, self.config.devices.len())?;
        if self.config.fail_open {
            return Err(DeviceError::Busy);
        }

        self.ledger.opens.fetch_add(1, Ordering::SeqCst);
        *self.ledger.last_request.lock() = Some(request.clone());
        *self.ledger.notifier.lock() = Some(notifier.clone());

        Ok(Box::new(MockDevice {
            config: self.config.clone(),
            ledger: Arc::clone(&self.ledger),
            notifier,
            prepared: vec![false; request.slot_count],
            closed: false,
        }))
    }
}

struct MockDevice {
    config: MockConfig,
    ledger: Arc<MockLedger>,
    notifier: CompletionNotifier,
    prepared: Vec<bool>,
    closed: bool,
}

impl WaveDevice for MockDevice {
    fn prepare(&mut self, slot: usize, _memory: SlotMemory) -> Result<(), DeviceError> {
        if self.config.fail_prepare_at == Some(slot) {
            return Err(DeviceError::Other(format!("injected prepare failure on slot {}", slot)));
        }
        let flag = self
            .prepared
            .get_mut(slot)
            .ok_or_else(|| DeviceError::Other(format!("slot {} out of range", slot)))?;
        *flag = true;
        self.ledger.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unprepare(&mut self, slot: usize) {
        if let Some(flag) = self.prepared.get_mut(slot) {
            if *flag {
                *flag = false;
                self.ledger.unprepares.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn write(&mut self, slot: usize, data: &[u8]) -> Result<(), DeviceError> {
        if self.config.fail_write {
            return Err(DeviceError::Other("injected write failure".to_string()));
        }
        if !self.prepared.get(slot).copied().unwrap_or(false) {
            return Err(DeviceError::Other(format!("slot {} not prepared", slot)));
        }

        self.ledger.writes.lock().push(slot);
        self.ledger.written_bytes.fetch_add(data.len(), Ordering::SeqCst);

        if self.config.auto_complete {
            self.notifier.complete(slot);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ledger.resets.fetch_add(1, Ordering::SeqCst);
        for slot in 0..self.prepared.len() {
            self.notifier.complete(slot);
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.ledger.closes.fetch_add(1, Ordering::SeqCst);
            *self.ledger.notifier.lock() = None;
        }
    }
}
