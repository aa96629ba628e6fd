//! 样本格式、音频规格和 PCM 打包
//!
//! 内部表示：所有位深统一左对齐到 i32 的高位
//! - 8-bit: 占据 bit[31:24]
//! - 16-bit: 占据 bit[31:16]
//! - 32-bit: 占据 bit[31:0]
//!
//! 打包时再按目标格式截取高位、转换符号和字节序

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 样本格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S8,
    U16Lsb,
    U16Msb,
    S16Lsb,
    S16Msb,
    S32Lsb,
    S32Msb,
    F32Lsb,
    F32Msb,
}

impl SampleFormat {
    /// 本机字节序的 16-bit signed
    #[cfg(target_endian = "little")]
    pub const S16_SYS: Self = Self::S16Lsb;
    #[cfg(target_endian = "big")]
    pub const S16_SYS: Self = Self::S16Msb;

    /// 本机字节序的 32-bit signed
    #[cfg(target_endian = "little")]
    pub const S32_SYS: Self = Self::S32Lsb;
    #[cfg(target_endian = "big")]
    pub const S32_SYS: Self = Self::S32Msb;

    /// 本机字节序的 32-bit float
    #[cfg(target_endian = "little")]
    pub const F32_SYS: Self = Self::F32Lsb;
    #[cfg(target_endian = "big")]
    pub const F32_SYS: Self = Self::F32Msb;

    pub const ALL: [SampleFormat; 10] = [
        Self::U8,
        Self::S8,
        Self::U16Lsb,
        Self::U16Msb,
        Self::S16Lsb,
        Self::S16Msb,
        Self::S32Lsb,
        Self::S32Msb,
        Self::F32Lsb,
        Self::F32Msb,
    ];

    /// 位深
    #[inline]
    pub fn bits(self) -> u16 {
        match self {
            Self::U8 | Self::S8 => 8,
            Self::U16Lsb | Self::U16Msb | Self::S16Lsb | Self::S16Msb => 16,
            Self::S32Lsb | Self::S32Msb | Self::F32Lsb | Self::F32Msb => 32,
        }
    }

    /// 每样本的字节数
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        self.bits() as usize / 8
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F32Lsb | Self::F32Msb)
    }

    /// 静音字节：只有 U8 的零点是 0x80
    #[inline]
    pub fn silence(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0x00,
        }
    }

    /// 回退优先级列表
    ///
    /// 第一个元素总是自身，其后依次是：同族另一字节序、同位深另一符号、
    /// 更宽的整数、浮点，最后是 8-bit。
    pub fn fallback_order(self) -> [SampleFormat; 10] {
        use SampleFormat::*;
        match self {
            U8 => [U8, S8, S16Lsb, S16Msb, U16Lsb, U16Msb, S32Lsb, S32Msb, F32Lsb, F32Msb],
            S8 => [S8, U8, S16Lsb, S16Msb, U16Lsb, U16Msb, S32Lsb, S32Msb, F32Lsb, F32Msb],
            S16Lsb => [S16Lsb, S16Msb, U16Lsb, U16Msb, S32Lsb, S32Msb, F32Lsb, F32Msb, U8, S8],
            S16Msb => [S16Msb, S16Lsb, U16Msb, U16Lsb, S32Msb, S32Lsb, F32Msb, F32Lsb, U8, S8],
            U16Lsb => [U16Lsb, U16Msb, S16Lsb, S16Msb, S32Lsb, S32Msb, F32Lsb, F32Msb, U8, S8],
            U16Msb => [U16Msb, U16Lsb, S16Msb, S16Lsb, S32Msb, S32Lsb, F32Msb, F32Lsb, U8, S8],
            S32Lsb => [S32Lsb, S32Msb, F32Lsb, F32Msb, S16Lsb, S16Msb, U16Lsb, U16Msb, U8, S8],
            S32Msb => [S32Msb, S32Lsb, F32Msb, F32Lsb, S16Msb, S16Lsb, U16Msb, U16Lsb, U8, S8],
            F32Lsb => [F32Lsb, F32Msb, S32Lsb, S32Msb, S16Lsb, S16Msb, U16Lsb, U16Msb, U8, S8],
            F32Msb => [F32Msb, F32Lsb, S32Msb, S32Lsb, S16Msb, S16Lsb, U16Msb, U16Lsb, U8, S8],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16Lsb => "u16le",
            Self::U16Msb => "u16be",
            Self::S16Lsb => "s16le",
            Self::S16Msb => "s16be",
            Self::S32Lsb => "s32le",
            Self::S32Msb => "s32be",
            Self::F32Lsb => "f32le",
            Self::F32Msb => "f32be",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    /// 支持 `s16` / `s32` / `f32` 这类不带字节序的写法（取本机字节序）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "s16" => return Ok(Self::S16_SYS),
            "s32" => return Ok(Self::S32_SYS),
            "f32" => return Ok(Self::F32_SYS),
            _ => {}
        }
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == lowered)
            .ok_or_else(|| format!("unknown sample format '{}'", s))
    }
}

/// 格式协商策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FormatPolicy {
    /// 只接受请求的格式
    Exact,
    /// 按优先级列表回退
    #[default]
    AllowFallback,
}

impl FormatPolicy {
    /// 按策略生成候选格式列表
    pub fn candidates(self, requested: SampleFormat) -> Vec<SampleFormat> {
        match self {
            Self::Exact => vec![requested],
            Self::AllowFallback => requested.fallback_order().to_vec(),
        }
    }
}

/// 音频规格
///
/// `samples` 是每个 slot 的采样帧数，`size` 是每个 slot 的字节数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub freq: u32,
    pub channels: u16,
    pub samples: u32,
    pub size: u32,
    pub silence: u8,
}

impl AudioSpec {
    /// 创建规格并计算派生字段
    ///
    /// 字节数溢出 u32 时返回 None
    pub fn new(format: SampleFormat, freq: u32, channels: u16, samples: u32) -> Option<Self> {
        let mut spec = Self {
            format,
            freq,
            channels,
            samples,
            size: 0,
            silence: format.silence(),
        };
        spec.size = spec.checked_size()?;
        Some(spec)
    }

    /// 每帧的字节数（所有声道）
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// slot 字节数 = 样本字节 × 声道 × 帧数
    pub fn checked_size(&self) -> Option<u32> {
        (self.format.bytes_per_sample() as u32)
            .checked_mul(self.channels as u32)?
            .checked_mul(self.samples)
    }

    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_frame() as u64 * self.freq as u64
    }

    /// 一个 slot 的播放时长
    pub fn slot_duration(&self) -> Duration {
        if self.freq == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.samples as u64 * 1_000_000_000 / self.freq as u64)
    }
}

/// 用静音填充缓冲区
#[inline]
pub fn fill_silence(spec: &AudioSpec, buf: &mut [u8]) {
    buf.fill(spec.silence);
}

/// 将 i32 样本（左对齐）打包为目标格式字节
///
/// 返回实际写入的样本数
pub fn samples_to_bytes(format: SampleFormat, samples: &[i32], output: &mut [u8]) -> usize {
    let width = format.bytes_per_sample();
    let count = samples.len().min(output.len() / width);

    for (sample, out) in samples[..count].iter().zip(output.chunks_exact_mut(width)) {
        let s = *sample;
        match format {
            SampleFormat::U8 => out[0] = ((s >> 24) + 128) as u8,
            SampleFormat::S8 => out[0] = (s >> 24) as i8 as u8,
            SampleFormat::U16Lsb => out.copy_from_slice(&(((s >> 16) + 32768) as u16).to_le_bytes()),
            SampleFormat::U16Msb => out.copy_from_slice(&(((s >> 16) + 32768) as u16).to_be_bytes()),
            SampleFormat::S16Lsb => out.copy_from_slice(&((s >> 16) as i16).to_le_bytes()),
            SampleFormat::S16Msb => out.copy_from_slice(&((s >> 16) as i16).to_be_bytes()),
            SampleFormat::S32Lsb => out.copy_from_slice(&s.to_le_bytes()),
            SampleFormat::S32Msb => out.copy_from_slice(&s.to_be_bytes()),
            SampleFormat::F32Lsb => out.copy_from_slice(&(s as f32 / 2_147_483_648.0).to_le_bytes()),
            SampleFormat::F32Msb => out.copy_from_slice(&(s as f32 / 2_147_483_648.0).to_be_bytes()),
        }
    }

    count
}

/// 将 [-1.0, 1.0] 的浮点样本转为左对齐 i32
#[inline]
pub fn f64_to_left_aligned(sample: f64) -> i32 {
    (sample.clamp(-1.0, 1.0) * i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_values() {
        assert_eq!(SampleFormat::U8.silence(), 0x80);
        assert_eq!(SampleFormat::S16_SYS.silence(), 0);
        assert_eq!(SampleFormat::U16Lsb.silence(), 0);
    }

    #[test]
    fn test_fallback_order_is_a_permutation() {
        for format in SampleFormat::ALL {
            let order = format.fallback_order();
            assert_eq!(order[0], format);
            for candidate in SampleFormat::ALL {
                assert_eq!(
                    order.iter().filter(|f| **f == candidate).count(),
                    1,
                    "{} missing or duplicated in fallback list of {}",
                    candidate,
                    format
                );
            }
        }
    }

    #[test]
    fn test_float_falls_back_to_s32_first() {
        let order = SampleFormat::F32Lsb.fallback_order();
        assert_eq!(order[1], SampleFormat::F32Msb);
        assert_eq!(order[2], SampleFormat::S32Lsb);
    }

    #[test]
    fn test_policy_candidates() {
        assert_eq!(
            FormatPolicy::Exact.candidates(SampleFormat::F32Lsb),
            vec![SampleFormat::F32Lsb]
        );
        assert_eq!(FormatPolicy::AllowFallback.candidates(SampleFormat::U8).len(), 10);
    }

    #[test]
    fn test_spec_size() {
        let spec = AudioSpec::new(SampleFormat::S16Lsb, 44100, 2, 11028).unwrap();
        assert_eq!(spec.size, 11028 * 4);
        assert_eq!(spec.silence, 0);

        let spec = AudioSpec::new(SampleFormat::U8, 8000, 1, 2000).unwrap();
        assert_eq!(spec.size, 2000);
        assert_eq!(spec.silence, 0x80);
        assert_eq!(spec.slot_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_spec_size_overflow() {
        assert!(AudioSpec::new(SampleFormat::S32Lsb, 48000, 2, u32::MAX).is_none());
    }

    #[test]
    fn test_pack_u8() {
        let mut out = [0u8; 3];
        let n = samples_to_bytes(SampleFormat::U8, &[0, i32::MAX, i32::MIN], &mut out);
        assert_eq!(n, 3);
        assert_eq!(out, [0x80, 0xFF, 0x00]);
    }

    #[test]
    fn test_pack_s16_both_endians() {
        // +16384 左对齐
        let sample = 16384i32 << 16;
        let mut le = [0u8; 2];
        let mut be = [0u8; 2];
        samples_to_bytes(SampleFormat::S16Lsb, &[sample], &mut le);
        samples_to_bytes(SampleFormat::S16Msb, &[sample], &mut be);
        assert_eq!(le, [0x00, 0x40]);
        assert_eq!(be, [0x40, 0x00]);

        // 负数
        samples_to_bytes(SampleFormat::S16Lsb, &[-16384i32 << 16], &mut le);
        assert_eq!(le, [0x00, 0xC0]);
    }

    #[test]
    fn test_pack_u16_offset() {
        let mut out = [0u8; 2];
        samples_to_bytes(SampleFormat::U16Lsb, &[0], &mut out);
        assert_eq!(u16::from_le_bytes(out), 32768);
    }

    #[test]
    fn test_pack_s32_and_f32() {
        let mut out = [0u8; 4];
        samples_to_bytes(SampleFormat::S32Lsb, &[0x1234_5678], &mut out);
        assert_eq!(out, [0x78, 0x56, 0x34, 0x12]);

        samples_to_bytes(SampleFormat::F32Lsb, &[i32::MIN], &mut out);
        assert_eq!(f32::from_le_bytes(out), -1.0);
    }

    #[test]
    fn test_pack_stops_at_output_capacity() {
        let mut out = [0u8; 5];
        let n = samples_to_bytes(SampleFormat::S16Lsb, &[1 << 16, 2 << 16, 3 << 16], &mut out);
        assert_eq!(n, 2);
        assert_eq!(out[4], 0);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("s16".parse::<SampleFormat>().unwrap(), SampleFormat::S16_SYS);
        assert_eq!("U8".parse::<SampleFormat>().unwrap(), SampleFormat::U8);
        assert_eq!("f32be".parse::<SampleFormat>().unwrap(), SampleFormat::F32Msb);
        assert!("s24".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_f64_conversion_clamps() {
        assert_eq!(f64_to_left_aligned(2.0), i32::MAX);
        assert_eq!(f64_to_left_aligned(0.0), 0);
        assert!(f64_to_left_aligned(-1.0) < 0);
    }
}
