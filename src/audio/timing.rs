//! 单调时钟
//!
//! 统计和软件设备节拍共用一个进程级起点，时间戳以纳秒 u64 表示，
//! 便于存入原子变量

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// 进程级时间起点（只初始化一次）
static EPOCH: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// 获取当前时间（纳秒，自进程内首次调用起）
///
/// 返回值至少为 1，0 保留给“未采样”
#[inline]
pub fn now_ns() -> u64 {
    epoch().elapsed().as_nanos() as u64 + 1
}

/// 纳秒转毫秒（浮点，用于报告）
#[inline]
pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

/// 距 `deadline` 还剩多少时间，已过期返回 0
#[inline]
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
