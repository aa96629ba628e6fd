//! Wave Ring Library
//!
//! Bounded slot ring between a producer thread and a waveform audio device,
//! with a callback-driven device layer on top.

pub mod audio;
pub mod decode;
pub mod engine;
