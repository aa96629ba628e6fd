//! 设备层端到端测试（disk 驱动）

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use wave_ring::audio::backend::{Direction, DriverKind};
use wave_ring::audio::format::{AudioSpec, FormatPolicy, SampleFormat};
use wave_ring::audio::ring_buffer::RingConfig;
use wave_ring::engine::{AudioDevice, CaptureFn, DeviceConfig, Flow, PlaybackFn};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wave-ring-{}-{}.raw", name, std::process::id()))
}

/// 8kHz 单声道 u8：每 slot 正好 2000 字节（1/4 秒）
fn disk_config(path: PathBuf, direction: Direction) -> DeviceConfig {
    DeviceConfig {
        driver: DriverKind::Disk {
            path,
            realtime: false,
        },
        device: None,
        direction,
        format: SampleFormat::U8,
        policy: FormatPolicy::Exact,
        freq: 8000,
        channels: 1,
        samples: 512,
        start_paused: false,
        ring: RingConfig {
            slot_count: 3,
            ..RingConfig::default()
        },
    }
}

#[test]
fn playback_writes_every_slot_in_order() {
    let path = temp_path("playback");
    let mut calls = 0u8;

    let mut device = AudioDevice::open(
        &disk_config(path.clone(), Direction::Playback),
        PlaybackFn(move |buf: &mut [u8], _: &AudioSpec| {
            calls += 1;
            buf.fill(calls);
            if calls == 4 {
                Flow::Finished
            } else {
                Flow::Continue
            }
        }),
    )
    .unwrap();

    assert_eq!(device.spec().samples, 2000);
    assert_eq!(device.spec().size, 2000);
    device.join();
    assert!(device.is_finished());

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), 4 * 2000);
    for (i, chunk) in written.chunks(2000).enumerate() {
        assert!(chunk.iter().all(|&b| b == i as u8 + 1), "slot {} out of order", i);
    }

    let stats = device.stats();
    assert_eq!(stats.slots_submitted, 4);
    assert_eq!(stats.slots_completed, 4);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn capture_reads_file_then_silence() {
    let path = temp_path("capture");
    let source: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &source).unwrap();

    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);

    let mut device = AudioDevice::open(
        &disk_config(path.clone(), Direction::Capture),
        CaptureFn(move |data: &[u8], _: &AudioSpec| {
            let mut sink = sink.lock();
            sink.extend_from_slice(data);
            if sink.len() >= 4000 {
                Flow::Finished
            } else {
                Flow::Continue
            }
        }),
    )
    .unwrap();
    device.join();

    let captured = captured.lock();
    assert_eq!(captured.len(), 4000);
    assert_eq!(&captured[..3000], &source[..]);
    // 文件读完后是 u8 静音
    assert!(captured[3000..].iter().all(|&b| b == 0x80));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn unsupported_format_fails_synchronously() {
    let path = temp_path("float");
    let mut config = disk_config(path.clone(), Direction::Playback);
    config.format = SampleFormat::F32_SYS;

    let result = AudioDevice::open(&config, PlaybackFn(|_: &mut [u8], _: &AudioSpec| Flow::Continue));
    assert!(result.is_err());
    // 格式协商在打开设备之前完成，文件不会被创建
    assert!(!path.exists());
}

#[test]
fn null_driver_closes_promptly() {
    let config = DeviceConfig {
        driver: DriverKind::Null,
        freq: 8000,
        channels: 1,
        samples: 512,
        format: SampleFormat::S16_SYS,
        ring: RingConfig {
            drain_timeout: Some(std::time::Duration::from_millis(600)),
            ..RingConfig::default()
        },
        ..DeviceConfig::default()
    };

    let mut device =
        AudioDevice::open(&config, PlaybackFn(|_: &mut [u8], _: &AudioSpec| Flow::Continue)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(50));

    let start = std::time::Instant::now();
    device.close();
    assert!(device.is_finished());
    // 最多排空两个 1/4 秒的 slot
    assert!(start.elapsed() < std::time::Duration::from_secs(2));
}
