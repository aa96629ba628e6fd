//! 文件解码
//!
//! symphonia 负责容器探测和解码（FLAC, WAV, AIFF, MP3）。
//! 输出交错的 i32 样本，左对齐到高位，与 `format::samples_to_bytes` 约定一致。

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot read input: {0}")]
    FileOpen(#[from] std::io::Error),

    #[error("container not recognised")]
    UnsupportedFormat,

    #[error("input has no decodable audio track")]
    NoAudioTrack,

    #[error("no decoder for codec: {0}")]
    DecoderCreation(String),

    #[error("packet decode failed: {0}")]
    DecodeFailed(String),
}

/// 音轨信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// 源位深（有损格式为 None）
    pub bit_depth: Option<u32>,
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    /// 容器名（大写扩展名）
    pub format: String,
    pub codec: String,
}

impl AudioInfo {
    fn from_params(params: &CodecParameters, container: String) -> Result<Self, DecodeError> {
        let sample_rate = params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let codec = match symphonia::default::get_codecs().get_codec(params.codec) {
            Some(descriptor) => descriptor.short_name.to_string(),
            None => "Unknown".to_string(),
        };

        Ok(Self {
            sample_rate,
            // 未声明声道布局的流按立体声处理
            channels: params.channels.map_or(2, |layout| layout.count() as u16),
            bit_depth: params.bits_per_sample,
            total_frames: params.n_frames,
            duration_secs: params.n_frames.map(|n| n as f64 / sample_rate as f64),
            format: container,
            codec,
        })
    }
}

/// 按扩展名提示探测容器
fn probe(path: &Path) -> Result<Box<dyn FormatReader>, DecodeError> {
    let source = MediaSourceStream::new(
        Box::new(File::open(path)?),
        MediaSourceStreamOptions::default(),
    );

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let options = FormatOptions {
        enable_gapless: true,
        ..FormatOptions::default()
    };
    symphonia::default::get_probe()
        .format(&hint, source, &options, &MetadataOptions::default())
        .map(|probed| probed.format)
        .map_err(|_| DecodeError::UnsupportedFormat)
}

/// 单音轨解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    sample_buf: Option<SampleBuffer<i32>>,
}

impl AudioDecoder {
    /// 打开文件，选中第一条可解码的音轨
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let reader = probe(path)?;

        let container = match path.extension().and_then(|e| e.to_str()) {
            Some(extension) => extension.to_uppercase(),
            None => "Unknown".to_string(),
        };

        let (track_id, params) = reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .map(|track| (track.id, track.codec_params.clone()))
            .ok_or(DecodeError::NoAudioTrack)?;

        let info = AudioInfo::from_params(&params, container)?;
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            sample_buf: None,
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码下一块数据
    ///
    /// 返回交错的 i32 样本（左对齐）；空切片表示文件结束
    pub fn decode_next_i32(&mut self) -> Result<&[i32], DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(&[]);
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // 跳过损坏的帧
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let frames = decoded.capacity() as u64;
            let spec = *decoded.spec();
            let needed = frames as usize * spec.channels.count();
            if self.sample_buf.as_ref().is_some_and(|b| b.capacity() < needed) {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(frames, spec));
            buf.copy_interleaved_ref(decoded);
            return Ok(buf.samples());
        }
    }
}

/// 按需读取固定数量样本的流式读取器
pub struct PcmReader {
    decoder: AudioDecoder,
    pending: Vec<i32>,
    position: usize,
    eof: bool,
}

impl PcmReader {
    pub fn new(decoder: AudioDecoder) -> Self {
        Self {
            decoder,
            pending: Vec::new(),
            position: 0,
            eof: false,
        }
    }

    pub fn info(&self) -> &AudioInfo {
        self.decoder.info()
    }

    /// 填充 `out`，返回写入的样本数
    ///
    /// 小于 `out.len()` 表示文件已读完
    pub fn read(&mut self, out: &mut [i32]) -> Result<usize, DecodeError> {
        let mut written = 0;
        while written < out.len() {
            if self.position == self.pending.len() {
                if self.eof {
                    break;
                }
                let samples = self.decoder.decode_next_i32()?;
                if samples.is_empty() {
                    self.eof = true;
                    break;
                }
                self.pending.clear();
                self.pending.extend_from_slice(samples);
                self.position = 0;
            }

            let n = (out.len() - written).min(self.pending.len() - self.position);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.position..self.position + n]);
            written += n;
            self.position += n;
        }
        Ok(written)
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.position == self.pending.len()
    }
}

/// 交错样本的声道重映射
///
/// 多于目标声道时保留前几个声道，单声道到多声道时复制
pub fn remap_channels(input: &[i32], from: usize, to: usize, out: &mut Vec<i32>) {
    out.clear();
    if from == 0 || to == 0 {
        return;
    }
    for frame in input.chunks_exact(from) {
        for ch in 0..to {
            out.push(frame[ch.min(from - 1)]);
        }
    }
}
