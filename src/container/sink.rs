use std::path::Path;

use crate::{
    error::Result,
    types::{Codec, OutputSettings},
};

/// Per-track encoder setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub codec: Codec,
    /// Rate of the samples handed to `write_chunk`.
    pub sample_rate: u32,
    /// Rate the encoder runs at.
    pub encoder_sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
}

impl EncoderConfig {
    pub fn stereo(settings: &OutputSettings, input_sample_rate: u32) -> Self {
        Self {
            codec: settings.codec,
            sample_rate: input_sample_rate,
            encoder_sample_rate: settings.sample_rate.hz(),
            channels: 2,
            bit_rate: settings.bit_rate,
        }
    }
}

/// Options that must be set before the container is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Allow codecs the muxer only supports experimentally (Opus in MP4).
    pub experimental: bool,
}

impl ContainerOptions {
    pub fn for_codec(codec: Codec) -> Self {
        Self {
            experimental: codec.needs_experimental_muxing(),
        }
    }
}

/// Write-only multi-track container.
///
/// Lifecycle: `add_track` for every track, `open` once, any number of
/// `write_chunk` calls, then `close` exactly once.
pub trait ContainerSink {
    /// Declares a track and returns its index.
    fn add_track(&mut self, config: &EncoderConfig) -> Result<usize>;

    fn open(&mut self, options: &ContainerOptions) -> Result<()>;

    /// Appends interleaved frames to `track`.
    fn write_chunk(&mut self, track: usize, interleaved: &[f32]) -> Result<()>;

    /// Flushes every encoder and finalizes the file.
    fn close(&mut self) -> Result<()>;
}

impl<S: ContainerSink + ?Sized> ContainerSink for Box<S> {
    fn add_track(&mut self, config: &EncoderConfig) -> Result<usize> {
        (**self).add_track(config)
    }

    fn open(&mut self, options: &ContainerOptions) -> Result<()> {
        (**self).open(options)
    }

    fn write_chunk(&mut self, track: usize, interleaved: &[f32]) -> Result<()> {
        (**self).write_chunk(track, interleaved)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Creates a sink writing to `path`.
pub trait SinkFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerSink>>;
}

impl<F> SinkFactory for F
where
    F: Fn(&Path) -> Result<Box<dyn ContainerSink>>,
{
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerSink>> {
        self(path)
    }
}
