//! 可用计数器：完成通知 → 生产者
//!
//! 设备回调只往 channel 里投递一条消息，wait 消费消息。
//! 信道容量 N+1：最多 N 个可用单位，外加一条关闭消息。
//! 初始预置 N-1 个 credit（一个 slot 视为在途）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use crossbeam_utils::CachePadded;

use super::error::RingError;
use super::stats::RingStats;
use super::timing::now_ns;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotEvent {
    Credit,
    Completed(usize),
    Closed,
}

/// 一次 wait 释放的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// 初始预置的 credit
    Credit,
    /// 设备完成了该 slot
    Slot(usize),
}

/// 每个 slot 的完成标志
///
/// 每个标志独占一个 cache line，设备回调写、生产者读
pub struct SlotFlags {
    done: Box<[CachePadded<AtomicBool>]>,
}

impl SlotFlags {
    fn new(slot_count: usize) -> Self {
        Self {
            done: (0..slot_count)
                .map(|_| CachePadded::new(AtomicBool::new(true)))
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.done.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    #[inline]
    pub fn is_done(&self, slot: usize) -> bool {
        self.done
            .get(slot)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(true)
    }

    #[inline]
    pub(crate) fn mark_done(&self, slot: usize) {
        if let Some(flag) = self.done.get(slot) {
            flag.store(true, Ordering::Release);
        }
    }

    #[inline]
    pub(crate) fn mark_pending(&self, slot: usize) {
        if let Some(flag) = self.done.get(slot) {
            flag.store(false, Ordering::Release);
        }
    }

    /// 仍由设备持有的 slot 数
    pub fn pending(&self) -> usize {
        self.done
            .iter()
            .filter(|f| !f.load(Ordering::Acquire))
            .count()
    }
}

/// 完成通知器
///
/// 交给设备，在设备的回调上下文中调用。不阻塞、不分配、不打日志。
#[derive(Clone)]
pub struct CompletionNotifier {
    tx: Sender<SlotEvent>,
    flags: Arc<SlotFlags>,
    stats: Arc<RingStats>,
}

impl CompletionNotifier {
    /// 设备完成了一个 slot（播放完毕或录音填满）
    #[inline]
    pub fn complete(&self, slot: usize) {
        if slot >= self.flags.len() {
            return;
        }
        self.flags.mark_done(slot);
        self.stats.record_completion();
        let _ = self.tx.try_send(SlotEvent::Completed(slot));
    }

    /// 设备没有接收该 slot，直接归还给生产者
    #[inline]
    pub(crate) fn recycle(&self, slot: usize) {
        if slot >= self.flags.len() {
            return;
        }
        self.flags.mark_done(slot);
        let _ = self.tx.try_send(SlotEvent::Completed(slot));
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.flags.len()
    }
}

/// 关闭句柄
///
/// 可以跨线程使用：唤醒阻塞在 wait 上的生产者，使其返回 `WaitAbandoned`。
/// 资源释放仍由持有 ring 的线程完成。
#[derive(Clone)]
pub struct RingCloser {
    tx: Sender<SlotEvent>,
    closed: Arc<CachePadded<AtomicBool>>,
}

impl RingCloser {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.try_send(SlotEvent::Closed);
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 生产者侧的可用计数
pub struct Availability {
    rx: Receiver<SlotEvent>,
    tx: Sender<SlotEvent>,
    closed: Arc<CachePadded<AtomicBool>>,
    stats: Arc<RingStats>,
}

impl Availability {
    /// 消费一个可用单位，没有时阻塞
    ///
    /// 没有超时；ring 关闭时返回 `WaitAbandoned`
    pub fn acquire(&self) -> Result<Released, RingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RingError::WaitAbandoned);
        }

        let event = match self.rx.try_recv() {
            Ok(event) => {
                self.stats.record_wait(None);
                event
            }
            Err(TryRecvError::Empty) => {
                let start = now_ns();
                let event = self.rx.recv().map_err(|_| RingError::WaitAbandoned)?;
                self.stats.record_wait(Some(now_ns().saturating_sub(start)));
                event
            }
            Err(TryRecvError::Disconnected) => return Err(RingError::WaitAbandoned),
        };

        match event {
            SlotEvent::Credit => Ok(Released::Credit),
            SlotEvent::Completed(slot) => Ok(Released::Slot(slot)),
            SlotEvent::Closed => {
                // 关闭消息保持粘滞，后续 wait 同样返回
                let _ = self.tx.try_send(SlotEvent::Closed);
                Err(RingError::WaitAbandoned)
            }
        }
    }

    /// 当前可用单位数（含未消费的关闭消息）
    #[inline]
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

/// 可用计数器的全部端点
pub(crate) struct CompletionChannel {
    pub notifier: CompletionNotifier,
    pub availability: Availability,
    pub closer: RingCloser,
    pub flags: Arc<SlotFlags>,
}

/// 创建 N 个 slot 的计数器，预置 N-1 个 credit
pub(crate) fn completion_channel(slot_count: usize, stats: Arc<RingStats>) -> CompletionChannel {
    let (tx, rx) = bounded(slot_count + 1);
    for _ in 0..slot_count.saturating_sub(1) {
        let _ = tx.try_send(SlotEvent::Credit);
    }

    let flags = Arc::new(SlotFlags::new(slot_count));
    let closed = Arc::new(CachePadded::new(AtomicBool::new(false)));

    CompletionChannel {
        notifier: CompletionNotifier {
            tx: tx.clone(),
            flags: Arc::clone(&flags),
            stats: Arc::clone(&stats),
        },
        availability: Availability {
            rx,
            tx: tx.clone(),
            closed: Arc::clone(&closed),
            stats,
        },
        closer: RingCloser { tx, closed },
        flags,
    }
}
