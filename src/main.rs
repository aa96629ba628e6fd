//! Wave Ring - 波形设备命令行工具
//!
//! 命令：
//! - drivers / devices: 列出驱动和设备
//! - tone: 播放正弦测试音
//! - play: 解码文件并播放
//! - record: 录音到原始 PCM 文件

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use wave_ring::audio::backend::{Direction, DriverKind, DRIVER_NAMES};
use wave_ring::audio::format::{
    f64_to_left_aligned, fill_silence, samples_to_bytes, AudioSpec, FormatPolicy, SampleFormat,
};
use wave_ring::audio::registry::DeviceRegistry;
use wave_ring::audio::ring_buffer::RingConfig;
use wave_ring::decode::{remap_channels, AudioDecoder, PcmReader};
use wave_ring::engine::{AudioCallback, AudioDevice, DeviceConfig, Flow};

/// Wave Ring - bounded slot ring for waveform audio devices
#[derive(Parser)]
#[command(name = "wave-ring")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Audio driver: winmm, null or disk
    #[arg(long, global = true, env = "WAVE_RING_DRIVER")]
    driver: Option<String>,

    /// Raw PCM file used by the disk driver
    #[arg(long, global = true, value_name = "PATH")]
    disk_path: Option<PathBuf>,

    /// Pace the disk driver in real time
    #[arg(long, global = true)]
    disk_realtime: bool,

    /// Select device by name (use 'devices' to list)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Sample format (u8, s16, s32, f32, s16le, ...)
    #[arg(short, long, global = true, default_value = "s16")]
    format: SampleFormat,

    /// Fail instead of falling back to another sample format
    #[arg(long, global = true)]
    exact_format: bool,

    /// Sample rate in Hz (play uses the file's rate)
    #[arg(short, long, global = true, default_value = "44100")]
    rate: u32,

    /// Channel count (clamped to stereo)
    #[arg(short, long, global = true, default_value = "2")]
    channels: u16,

    /// Frames per slot (raised to a quarter second)
    #[arg(long, global = true, default_value = "4096")]
    samples: u32,

    /// Number of slots in the ring
    #[arg(long, global = true, default_value = "2")]
    slots: usize,

    /// Give up draining after this many milliseconds
    #[arg(long, global = true, value_name = "MS")]
    drain_timeout_ms: Option<u64>,

    /// Lock slot memory (mlock)
    #[arg(long, global = true)]
    lock_memory: bool,

    /// Print ring statistics on exit
    #[arg(long, global = true)]
    stats: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio drivers
    Drivers,

    /// List devices of the selected driver
    Devices {
        /// List capture devices instead of playback devices
        #[arg(long)]
        capture: bool,
    },

    /// Play a sine tone
    Tone {
        /// Tone frequency in Hz
        #[arg(long, default_value = "440")]
        hz: f64,

        /// Duration in seconds
        #[arg(long, default_value = "2")]
        seconds: f64,

        /// Amplitude (0.0-1.0)
        #[arg(long, default_value = "0.25")]
        amplitude: f64,
    },

    /// Decode a file and play it
    Play {
        /// Audio file to play
        file: PathBuf,
    },

    /// Record raw PCM to a file
    Record {
        /// Output file
        file: PathBuf,

        /// Duration in seconds
        #[arg(long, default_value = "5")]
        seconds: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Commands::Drivers => list_drivers(),
        Commands::Devices { capture } => list_devices(&cli, capture),
        Commands::Tone {
            hz,
            seconds,
            amplitude,
        } => play_tone(&cli, hz, seconds, amplitude),
        Commands::Play { ref file } => play_file(&cli, file),
        Commands::Record { ref file, seconds } => record(&cli, file, seconds),
    }
}

/// 由命令行参数确定驱动
fn driver_kind(cli: &Cli) -> anyhow::Result<DriverKind> {
    let kind = match cli.driver {
        Some(ref name) => DriverKind::from_name(name, cli.disk_path.clone())?,
        None => DriverKind::platform_default(),
    };
    Ok(match kind {
        DriverKind::Disk { path, .. } => DriverKind::Disk {
            path,
            realtime: cli.disk_realtime,
        },
        other => other,
    })
}

fn create_device_config(cli: &Cli, direction: Direction) -> anyhow::Result<DeviceConfig> {
    Ok(DeviceConfig {
        driver: driver_kind(cli)?,
        device: cli.device.clone(),
        direction,
        format: cli.format,
        policy: if cli.exact_format {
            FormatPolicy::Exact
        } else {
            FormatPolicy::AllowFallback
        },
        freq: cli.rate,
        channels: cli.channels,
        samples: cli.samples,
        start_paused: false,
        ring: RingConfig {
            slot_count: cli.slots,
            drain_timeout: cli.drain_timeout_ms.map(Duration::from_millis),
            lock_memory: cli.lock_memory,
            ..RingConfig::default()
        },
    })
}

fn list_drivers() -> anyhow::Result<()> {
    println!("=== Audio Drivers ===\n");

    let default = DriverKind::platform_default();
    for name in DRIVER_NAMES {
        let kind = DriverKind::from_name(name, Some(PathBuf::from("wave-ring.raw")))?;
        let default_mark = if kind.name() == default.name() { " *" } else { "" };
        match kind.create() {
            Ok(driver) if driver.is_available() => {
                println!("{:<6} {}{}", driver.name(), driver.description(), default_mark);
            }
            Ok(driver) => println!("{:<6} unavailable", driver.name()),
            Err(e) => println!("{:<6} unavailable ({})", name, e),
        }
    }

    println!();
    println!("* = platform default");
    println!("Select driver: wave-ring --driver <NAME> ... (or WAVE_RING_DRIVER)");
    Ok(())
}

fn list_devices(cli: &Cli, capture: bool) -> anyhow::Result<()> {
    let direction = if capture {
        Direction::Capture
    } else {
        Direction::Playback
    };
    let driver = driver_kind(cli)?.create()?;

    let mut registry = DeviceRegistry::new();
    let snapshot = registry.refresh(driver.as_ref(), direction);

    println!("=== {} devices ({}) ===\n", direction, snapshot.driver());
    for (index, name) in snapshot.iter().enumerate() {
        let default_mark = if index == 0 { " *" } else { "" };
        println!("[{:>2}] {}{}", index, name, default_mark);
    }
    if snapshot.is_empty() {
        println!("(none)");
    }

    println!();
    println!("* = default");
    println!("Select device: wave-ring -d <NAME> <command>");
    Ok(())
}

/// 正弦测试音
struct ToneGenerator {
    hz: f64,
    amplitude: f64,
    phase: f64,
    frames_left: u64,
    scratch: Vec<i32>,
}

impl ToneGenerator {
    fn new(hz: f64, amplitude: f64, frames: u64) -> Self {
        Self {
            hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            frames_left: frames,
            scratch: Vec::new(),
        }
    }
}

impl AudioCallback for ToneGenerator {
    fn fill(&mut self, buf: &mut [u8], spec: &AudioSpec) -> Flow {
        let channels = spec.channels as usize;
        let frames = (buf.len() / spec.bytes_per_frame()).min(self.frames_left as usize);
        let step = self.hz * std::f64::consts::TAU / spec.freq as f64;

        self.scratch.clear();
        for _ in 0..frames {
            let sample = f64_to_left_aligned(self.phase.sin() * self.amplitude);
            self.scratch.extend(std::iter::repeat(sample).take(channels));
            self.phase = (self.phase + step) % std::f64::consts::TAU;
        }

        let written = samples_to_bytes(spec.format, &self.scratch, buf);
        fill_silence(spec, &mut buf[written * spec.format.bytes_per_sample()..]);

        self.frames_left -= frames as u64;
        if self.frames_left == 0 {
            Flow::Finished
        } else {
            Flow::Continue
        }
    }
}

/// 文件播放回调
struct FilePlayback {
    reader: PcmReader,
    source_channels: usize,
    decoded: Vec<i32>,
    remapped: Vec<i32>,
}

impl AudioCallback for FilePlayback {
    fn fill(&mut self, buf: &mut [u8], spec: &AudioSpec) -> Flow {
        let frames = buf.len() / spec.bytes_per_frame();
        let wanted = frames * self.source_channels;
        self.decoded.resize(wanted, 0);

        let read = match self.reader.read(&mut self.decoded) {
            Ok(n) => n,
            Err(e) => {
                log::error!("Decode error: {}", e);
                0
            }
        };

        remap_channels(
            &self.decoded[..read],
            self.source_channels,
            spec.channels as usize,
            &mut self.remapped,
        );
        let written = samples_to_bytes(spec.format, &self.remapped, buf);
        fill_silence(spec, &mut buf[written * spec.format.bytes_per_sample()..]);

        if read < wanted {
            Flow::Finished
        } else {
            Flow::Continue
        }
    }
}

/// 录音回调：原始 PCM 写入文件
struct FileRecorder {
    writer: BufWriter<File>,
    bytes_left: u64,
}

impl AudioCallback for FileRecorder {
    fn consume(&mut self, data: &[u8], _spec: &AudioSpec) -> Flow {
        let n = (data.len() as u64).min(self.bytes_left) as usize;
        if let Err(e) = self.writer.write_all(&data[..n]) {
            log::error!("Write failed: {}", e);
            return Flow::Finished;
        }
        self.bytes_left -= n as u64;
        if self.bytes_left == 0 {
            if let Err(e) = self.writer.flush() {
                log::error!("Flush failed: {}", e);
            }
            Flow::Finished
        } else {
            Flow::Continue
        }
    }
}

fn play_tone(cli: &Cli, hz: f64, seconds: f64, amplitude: f64) -> anyhow::Result<()> {
    let config = create_device_config(cli, Direction::Playback)?;
    let frames = (seconds.max(0.0) * config.freq as f64) as u64;

    println!("Wave Ring - Tone {:.1}Hz for {:.1}s", hz, seconds);
    let device = AudioDevice::open(&config, ToneGenerator::new(hz, amplitude, frames))?;
    run_until_finished(cli, device)
}

fn play_file(cli: &Cli, file: &PathBuf) -> anyhow::Result<()> {
    let decoder = AudioDecoder::open(file)
        .with_context(|| format!("failed to open {}", file.display()))?;
    let info = decoder.info().clone();

    println!("Wave Ring - Loading: {}", file.display());
    log::info!(
        "Format: {} | Codec: {} | {}Hz {}ch {}bit | Duration: {:.1}s",
        info.format,
        info.codec,
        info.sample_rate,
        info.channels,
        info.bit_depth.unwrap_or(0),
        info.duration_secs.unwrap_or(0.0)
    );

    let mut config = create_device_config(cli, Direction::Playback)?;
    config.freq = info.sample_rate;
    config.channels = info.channels;

    let callback = FilePlayback {
        reader: PcmReader::new(decoder),
        source_channels: info.channels as usize,
        decoded: Vec::new(),
        remapped: Vec::new(),
    };
    let device = AudioDevice::open(&config, callback)?;
    run_until_finished(cli, device)
}

fn record(cli: &Cli, file: &PathBuf, seconds: f64) -> anyhow::Result<()> {
    // 字节数要按实际生效的规格计算，先以暂停状态打开
    let mut config = create_device_config(cli, Direction::Capture)?;
    config.start_paused = true;
    let writer = BufWriter::new(
        File::create(file).with_context(|| format!("failed to create {}", file.display()))?,
    );

    let recorder = Arc::new(parking_lot::Mutex::new(None::<FileRecorder>));
    let slot = Arc::clone(&recorder);
    let device = AudioDevice::open(
        &config,
        wave_ring::engine::CaptureFn(move |data: &[u8], spec: &AudioSpec| {
            match slot.lock().as_mut() {
                Some(recorder) => recorder.consume(data, spec),
                None => Flow::Continue,
            }
        }),
    )?;

    let spec = *device.spec();
    let bytes = (seconds.max(0.0) * spec.bytes_per_second() as f64) as u64;
    *recorder.lock() = Some(FileRecorder {
        writer,
        bytes_left: bytes.max(1),
    });

    println!(
        "Wave Ring - Recording {:.1}s of {}Hz {}ch {} to {}",
        seconds,
        spec.freq,
        spec.channels,
        spec.format,
        file.display()
    );
    device.pause(false);
    run_until_finished(cli, device)
}

/// 等待设备结束或 Ctrl+C
fn run_until_finished(cli: &Cli, mut device: AudioDevice) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let spec = *device.spec();
    println!(
        "{} on {}: {}Hz {}ch {} | {} bytes per slot",
        device.direction(),
        device.driver_name(),
        spec.freq,
        spec.channels,
        spec.format,
        spec.size
    );
    println!("Press Ctrl+C to stop.\n");

    let slot_secs = spec.slot_duration().as_secs_f64();
    while running.load(Ordering::SeqCst) && !device.is_finished() {
        let stats = device.stats();
        print!(
            "\r[{:>7.1}s] slots: {} submitted, {} dropped",
            stats.slots_completed as f64 * slot_secs,
            stats.slots_submitted,
            stats.slots_dropped
        );
        io::stdout().flush()?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    device.close();

    if cli.stats {
        println!("\n{}", device.stats());
    }
    Ok(())
}
