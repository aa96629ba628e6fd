//! Ring 统计模块
//!
//! 完成回调里只做原子计数，节拍间隔采用降频采样减少开销

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::timing::{now_ns, ns_to_ms};

/// 节拍采样间隔：每 N 次完成通知才采样一次
const SAMPLE_INTERVAL: u64 = 4;

/// 间隔缓冲区大小
const INTERVAL_BUFFER_SIZE: usize = 256;

/// Ring 统计收集器
///
/// 所有操作都是 lock-free 的，可以在设备完成回调中调用
pub struct RingStats {
    slots_submitted: AtomicU64,
    slots_completed: AtomicU64,
    slots_dropped: AtomicU64,

    waits: AtomicU64,
    blocked_waits: AtomicU64,
    longest_block_ns: AtomicU64,

    last_sampled_ns: AtomicU64,
    // 完成通知之间的间隔（纳秒）
    interval_buffer: Box<[AtomicU64; INTERVAL_BUFFER_SIZE]>,
    interval_write_idx: AtomicUsize,
}

impl RingStats {
    pub fn new() -> Self {
        Self {
            slots_submitted: AtomicU64::new(0),
            slots_completed: AtomicU64::new(0),
            slots_dropped: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            blocked_waits: AtomicU64::new(0),
            longest_block_ns: AtomicU64::new(0),
            last_sampled_ns: AtomicU64::new(0),
            interval_buffer: Box::new(std::array::from_fn(|_| AtomicU64::new(0))),
            interval_write_idx: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn record_submit(&self) {
        self.slots_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// 设备拒绝写入，slot 被直接回收
    #[inline]
    pub fn record_drop(&self) {
        self.slots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 在完成回调内调用
    ///
    /// 只在采样点才读时钟
    #[inline]
    pub fn record_completion(&self) {
        let count = self.slots_completed.fetch_add(1, Ordering::Relaxed);

        if count % SAMPLE_INTERVAL == 0 {
            let now = now_ns();
            let last = self.last_sampled_ns.swap(now, Ordering::Relaxed);

            if last > 0 {
                let interval = now.saturating_sub(last);
                let idx = self.interval_write_idx.fetch_add(1, Ordering::Relaxed)
                    % INTERVAL_BUFFER_SIZE;
                self.interval_buffer[idx].store(interval, Ordering::Relaxed);
            }
        }
    }

    /// 记录一次 wait
    ///
    /// `blocked_ns`: 阻塞时长，未阻塞为 None
    #[inline]
    pub fn record_wait(&self, blocked_ns: Option<u64>) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        if let Some(ns) = blocked_ns {
            self.blocked_waits.fetch_add(1, Ordering::Relaxed);
            self.longest_block_ns.fetch_max(ns, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn slots_submitted(&self) -> u64 {
        self.slots_submitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn slots_completed(&self) -> u64 {
        self.slots_completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn slots_dropped(&self) -> u64 {
        self.slots_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn blocked_waits(&self) -> u64 {
        self.blocked_waits.load(Ordering::Relaxed)
    }

    /// 生成报告
    ///
    /// `slot_duration`: 单个 slot 的播放时长，用于计算期望节拍
    pub fn report(&self, slot_duration: Duration) -> StatsReport {
        let expected_sampled_interval_ns = slot_duration.as_nanos() as u64 * SAMPLE_INTERVAL;

        let intervals: Vec<u64> = self
            .interval_buffer
            .iter()
            .map(|v| v.load(Ordering::Relaxed))
            .filter(|&v| v > 0)
            .collect();

        let cadence = match (intervals.iter().min(), intervals.iter().max()) {
            (Some(&min_ns), Some(&max_ns)) => CadenceStats {
                min_ns,
                max_ns,
                avg_ns: intervals.iter().sum::<u64>() / intervals.len() as u64,
            },
            _ => CadenceStats::default(),
        };

        StatsReport {
            slots_submitted: self.slots_submitted(),
            slots_completed: self.slots_completed(),
            slots_dropped: self.slots_dropped(),
            waits: self.waits.load(Ordering::Relaxed),
            blocked_waits: self.blocked_waits(),
            longest_block_ns: self.longest_block_ns.load(Ordering::Relaxed),
            sample_interval: SAMPLE_INTERVAL,
            expected_sampled_interval_ns,
            cadence,
        }
    }
}

impl Default for RingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub slots_submitted: u64,
    pub slots_completed: u64,
    pub slots_dropped: u64,
    pub waits: u64,
    pub blocked_waits: u64,
    pub longest_block_ns: u64,
    pub sample_interval: u64,
    pub expected_sampled_interval_ns: u64,
    pub cadence: CadenceStats,
}

#[derive(Debug, Clone, Default)]
pub struct CadenceStats {
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ring Statistics")?;
        writeln!(f, "===============")?;
        writeln!(f, "Slots submitted: {}", self.slots_submitted)?;
        writeln!(f, "Slots completed: {}", self.slots_completed)?;
        writeln!(f, "Slots dropped:   {}", self.slots_dropped)?;
        writeln!(f)?;

        writeln!(
            f,
            "Waits: {} ({} blocked, longest {:.2} ms)",
            self.waits,
            self.blocked_waits,
            ns_to_ms(self.longest_block_ns)
        )?;
        writeln!(f)?;

        writeln!(f, "Completion Cadence (per {} slots):", self.sample_interval)?;
        writeln!(
            f,
            "  Expected: {:.2} ms",
            ns_to_ms(self.expected_sampled_interval_ns)
        )?;
        writeln!(f, "  Measured:")?;
        writeln!(f, "    Min: {:.2} ms", ns_to_ms(self.cadence.min_ns))?;
        writeln!(f, "    Max: {:.2} ms", ns_to_ms(self.cadence.max_ns))?;
        writeln!(f, "    Avg: {:.2} ms", ns_to_ms(self.cadence.avg_ns))?;

        let jitter_ns = self.cadence.max_ns.saturating_sub(self.cadence.min_ns);
        let jitter_pct = if self.expected_sampled_interval_ns > 0 {
            jitter_ns as f64 / self.expected_sampled_interval_ns as f64 * 100.0
        } else {
            0.0
        };
        writeln!(
            f,
            "  Jitter: {:.2} ms ({:.1}%)",
            ns_to_ms(jitter_ns),
            jitter_pct
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RingStats::new();
        stats.record_submit();
        stats.record_submit();
        stats.record_drop();
        stats.record_completion();
        stats.record_wait(None);
        stats.record_wait(Some(1_500_000));
        stats.record_wait(Some(500_000));

        let report = stats.report(Duration::from_millis(10));
        assert_eq!(report.slots_submitted, 2);
        assert_eq!(report.slots_dropped, 1);
        assert_eq!(report.slots_completed, 1);
        assert_eq!(report.waits, 3);
        assert_eq!(report.blocked_waits, 2);
        assert_eq!(report.longest_block_ns, 1_500_000);
        assert_eq!(report.expected_sampled_interval_ns, 40_000_000);
    }

    #[test]
    fn test_cadence_sampling() {
        let stats = RingStats::new();
        for _ in 0..(SAMPLE_INTERVAL * 3) {
            stats.record_completion();
            std::thread::sleep(Duration::from_millis(1));
        }

        let report = stats.report(Duration::from_millis(1));
        // 第一个采样点只建立基准
        assert!(report.cadence.min_ns > 0);
        assert!(report.cadence.max_ns >= report.cadence.min_ns);
    }

    #[test]
    fn test_report_display() {
        let stats = RingStats::new();
        stats.record_submit();
        let text = stats.report(Duration::from_millis(5)).to_string();
        assert!(text.contains("Slots submitted: 1"));
        assert!(text.contains("Jitter"));
    }
}
