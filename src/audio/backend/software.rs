//! 软件设备：null 和 disk
//!
//! 两者共用一个工作线程充当“硬件”：按提交顺序取出 slot，
//! 播放方向写入 sink（或丢弃），录音方向从 source 读取（或填静音），
//! 然后发出完成通知。实时模式下按 slot 时长定节拍。

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};

use super::{resolve_index, Direction, OpenRequest, SlotMemory, WaveDevice, WaveDriver};
use crate::audio::completion::CompletionNotifier;
use crate::audio::error::DeviceError;

/// 丢弃输出 / 录入静音，按实时节拍完成
pub struct NullDriver;

impl WaveDriver for NullDriver {
    fn name(&self) -> &'static str {
        "null"
    }

    fn description(&self) -> &'static str {
        "Paced null device"
    }

    fn detect_devices(&self, _direction: Direction) -> Vec<String> {
        vec!["null".to_string()]
    }

    fn open(
        &self,
        request: &OpenRequest,
        notifier: CompletionNotifier,
    ) -> Result<Box<dyn WaveDevice>, DeviceError> {
        resolve_index(request.device, 1)?;
        let device = SoftwareDevice::spawn(request, notifier, Endpoint::Null, true)?;
        Ok(Box::new(device))
    }
}

/// 原始 PCM 文件设备
///
/// 播放：写入文件；录音：从文件读取，读完后填静音
pub struct DiskDriver {
    path: PathBuf,
    realtime: bool,
}

impl DiskDriver {
    pub fn new(path: PathBuf, realtime: bool) -> Self {
        Self { path, realtime }
    }
}

impl WaveDriver for DiskDriver {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn description(&self) -> &'static str {
        "Raw PCM file device"
    }

    fn detect_devices(&self, _direction: Direction) -> Vec<String> {
        vec![self.path.display().to_string()]
    }

    fn open(
        &self,
        request: &OpenRequest,
        notifier: CompletionNotifier,
    ) -> Result<Box<dyn WaveDevice>, DeviceError> {
        resolve_index(request.device, 1)?;

        let endpoint = match request.direction {
            Direction::Playback => Endpoint::Sink(BufWriter::new(File::create(&self.path)?)),
            Direction::Capture => Endpoint::Source(BufReader::new(File::open(&self.path)?)),
        };

        log::info!(
            "Disk device opened for {}: {}",
            request.direction,
            self.path.display()
        );

        let device = SoftwareDevice::spawn(request, notifier, endpoint, self.realtime)?;
        Ok(Box::new(device))
    }
}

enum Endpoint {
    Null,
    Sink(BufWriter<File>),
    Source(BufReader<File>),
}

enum Job {
    /// 播放：数据已拷贝
    Play { slot: usize, data: Vec<u8> },
    /// 录音：填充 slot 内存
    Fill { slot: usize, memory: SlotMemory },
}

/// 工作线程驱动的软件设备
struct SoftwareDevice {
    direction: Direction,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    memory: Vec<Option<SlotMemory>>,
}

impl SoftwareDevice {
    fn spawn(
        request: &OpenRequest,
        notifier: CompletionNotifier,
        endpoint: Endpoint,
        realtime: bool,
    ) -> Result<Self, DeviceError> {
        let (tx, rx) = unbounded::<Job>();
        let period = if realtime {
            Some(request.spec.slot_duration())
        } else {
            None
        };
        let silence = request.spec.silence;

        let worker = thread::Builder::new()
            .name("wave-device".to_string())
            .spawn(move || {
                let mut endpoint = endpoint;
                let mut pacer = Pacer::new(period);
                let mut scratch = Vec::new();

                for job in rx.iter() {
                    pacer.tick();
                    match job {
                        Job::Play { slot, data } => {
                            if let Endpoint::Sink(ref mut sink) = endpoint {
                                if let Err(e) = sink.write_all(&data) {
                                    log::warn!("Disk device write failed: {}", e);
                                }
                            }
                            notifier.complete(slot);
                        }
                        Job::Fill { slot, memory } => {
                            scratch.resize(memory.len(), silence);
                            fill_from(&mut endpoint, &mut scratch, silence);
                            // slot 在完成通知发出前归设备所有，生产者不会访问
                            unsafe {
                                std::ptr::copy_nonoverlapping(
                                    scratch.as_ptr(),
                                    memory.as_ptr(),
                                    memory.len(),
                                );
                            }
                            notifier.complete(slot);
                        }
                    }
                }

                if let Endpoint::Sink(ref mut sink) = endpoint {
                    if let Err(e) = sink.flush() {
                        log::warn!("Disk device flush failed: {}", e);
                    }
                }
            })?;

        Ok(Self {
            direction: request.direction,
            tx: Some(tx),
            worker: Some(worker),
            memory: vec![None; request.slot_count],
        })
    }
}

/// 从 source 读满 `buf`，不足部分填静音
fn fill_from(endpoint: &mut Endpoint, buf: &mut [u8], silence: u8) {
    let mut filled = 0;
    if let Endpoint::Source(ref mut source) = endpoint {
        while filled < buf.len() {
            match source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Disk device read failed: {}", e);
                    break;
                }
            }
        }
    }
    buf[filled..].fill(silence);
}

/// 固定周期节拍，按绝对截止时间推进，避免累积漂移
struct Pacer {
    period: Option<Duration>,
    next: Option<Instant>,
}

impl Pacer {
    fn new(period: Option<Duration>) -> Self {
        Self { period, next: None }
    }

    fn tick(&mut self) {
        let Some(period) = self.period else {
            return;
        };
        let now = Instant::now();
        let deadline = match self.next {
            // 落后超过一个周期就重新对齐，不追赶
            Some(next) if next + period > now => next,
            _ => now,
        };
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next = Some(deadline + period);
    }
}

impl WaveDevice for SoftwareDevice {
    fn prepare(&mut self, slot: usize, memory: SlotMemory) -> Result<(), DeviceError> {
        let entry = self
            .memory
            .get_mut(slot)
            .ok_or_else(|| DeviceError::Other(format!("slot {} out of range", slot)))?;
        *entry = Some(memory);
        Ok(())
    }

    fn unprepare(&mut self, slot: usize) {
        if let Some(entry) = self.memory.get_mut(slot) {
            *entry = None;
        }
    }

    fn write(&mut self, slot: usize, data: &[u8]) -> Result<(), DeviceError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DeviceError::Other("device closed".to_string()))?;

        let job = match self.direction {
            Direction::Playback => Job::Play {
                slot,
                data: data.to_vec(),
            },
            Direction::Capture => {
                let memory = self
                    .memory
                    .get(slot)
                    .copied()
                    .flatten()
                    .ok_or_else(|| DeviceError::Other(format!("slot {} not prepared", slot)))?;
                Job::Fill { slot, memory }
            }
        };

        tx.send(job)
            .map_err(|_| DeviceError::Other("device worker stopped".to_string()))
    }

    fn close(&mut self) {
        // 断开 channel，工作线程处理完剩余任务后退出
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Software device worker panicked");
            }
        }
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        self.close();
    }
}
