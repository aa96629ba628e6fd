//! 文件解码

mod decoder;

pub use decoder::{remap_channels, AudioDecoder, AudioInfo, DecodeError, PcmReader};
