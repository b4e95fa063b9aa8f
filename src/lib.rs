//! # stemgen
//!
//! Packs a mix and its four separated stems (drums, bass, other, vocals) into a
//! single MP4 that stem-aware players understand, carrying the source's tags,
//! cover art and the per-stem name/color block.

pub mod container;
pub mod core;
pub mod error;
pub mod io;
pub mod metadata;
pub mod pipeline;
pub mod types;
pub mod utils;

pub use crate::{
    container::{
        sink::{ContainerOptions, ContainerSink, EncoderConfig, SinkFactory},
        stem_writer::{StemContainerWriter, WriteSummary},
        track_writer::{write_track, CHUNK_FRAMES},
    },
    core::{
        audio::{Decoder, SymphoniaDecoder},
        separator::{run_separation, CommandSeparator, Separation, Separator},
        shift_progress::{SeparationEvent, ShiftProgress},
    },
    error::{Result, StemError},
    io::progress::{set_progress_callback, ProgressSink, ReportedProgress, StemProgress},
    metadata::{
        stem_block::{Mp4StemBlock, StemBlockStore, StemEntry, StemManifest},
        synthesizer::{MetadataSynthesizer, SynthesisReport},
        tags::{Cover, CoverFormat, CoverSource, LoftyTagStore, TagField, TagSet, TagStore},
    },
    pipeline::{
        BatchReport, CreateInputs, CreateOptions, GenerateOptions, GenerateReport, StemGenerator,
    },
    types::{AudioData, Codec, Color, OutputSettings, SampleRate, StemKind, StemOverrides},
};

#[cfg(feature = "ffmpeg")]
pub use crate::container::ffmpeg::FfmpegSink;
