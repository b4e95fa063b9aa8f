use std::collections::HashMap;

use log::{debug, error, info};

use crate::{
    container::{
        sink::{ContainerOptions, ContainerSink, EncoderConfig},
        track_writer::{write_track_chunked, CHUNK_FRAMES},
    },
    error::{Result, StemError},
    io::progress::ProgressSink,
    types::{OutputSettings, StemKind},
};

/// Master plus the four stems.
pub const TRACK_COUNT: usize = 5;
pub const MASTER_TRACK: usize = 0;

/// Result of a successful container write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteSummary {
    pub tracks: usize,
    pub frames_per_track: u64,
}

/// An opened sink that gets closed exactly once, even when a write fails.
struct OpenContainer<'a, S: ContainerSink + ?Sized> {
    sink: &'a mut S,
    closed: bool,
}

impl<'a, S: ContainerSink + ?Sized> OpenContainer<'a, S> {
    fn open(sink: &'a mut S, options: &ContainerOptions) -> Result<Self> {
        sink.open(options)?;
        Ok(Self {
            sink,
            closed: false,
        })
    }

    fn sink(&mut self) -> &mut S {
        self.sink
    }

    fn close(mut self) -> Result<()> {
        self.closed = true;
        self.sink.close()
    }
}

impl<S: ContainerSink + ?Sized> Drop for OpenContainer<'_, S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.sink.close() {
                error!("closing container after a failed write: {e}");
            }
        }
    }
}

/// Writes the five-track layout: master on track 0, then drums, bass, other, vocals.
#[derive(Clone, Debug)]
pub struct StemContainerWriter {
    settings: OutputSettings,
    input_sample_rate: u32,
    chunk_frames: usize,
}

impl StemContainerWriter {
    pub fn new(settings: OutputSettings, input_sample_rate: u32) -> Self {
        Self {
            settings,
            input_sample_rate,
            chunk_frames: CHUNK_FRAMES,
        }
    }

    /// Overrides the chunk bound. Mostly useful to exercise chunking on short buffers.
    pub fn with_chunk_frames(mut self, chunk_frames: usize) -> Self {
        self.chunk_frames = chunk_frames.max(1);
        self
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    /// Validates everything, declares the tracks, then streams them in order.
    ///
    /// `stems` must hold exactly the canonical stem names. Nothing reaches the
    /// sink unless the inputs are valid.
    pub fn write<S>(
        &self,
        sink: &mut S,
        master: &[f32],
        stems: &HashMap<String, Vec<f32>>,
        progress: &mut dyn ProgressSink,
    ) -> Result<WriteSummary>
    where
        S: ContainerSink + ?Sized,
    {
        self.settings.validate()?;
        let ordered = ordered_stems(stems)?;

        let frames = (master.len() / 2) as u64;
        if master.len() % 2 != 0 {
            return Err(StemError::config("master track is not interleaved stereo"));
        }
        for (kind, samples) in StemKind::ALL.iter().zip(&ordered) {
            if samples.len() != master.len() {
                return Err(StemError::config(format!(
                    "stem `{kind}` has {} frames, master has {frames}",
                    samples.len() / 2
                )));
            }
        }

        let config = EncoderConfig::stereo(&self.settings, self.input_sample_rate);
        for expected in 0..TRACK_COUNT {
            let index = sink.add_track(&config)?;
            if index != expected {
                return Err(StemError::Container(format!(
                    "sink assigned index {index} to track {expected}"
                )));
            }
        }

        let total = frames * TRACK_COUNT as u64;
        info!(
            "writing {TRACK_COUNT} tracks of {frames} frames ({}, {})",
            self.settings.codec, self.settings.sample_rate
        );
        progress.start(total);

        let result = self.write_tracks(sink, master, &ordered, progress);
        progress.finish();
        result?;

        debug!("container closed");
        Ok(WriteSummary {
            tracks: TRACK_COUNT,
            frames_per_track: frames,
        })
    }

    fn write_tracks<S>(
        &self,
        sink: &mut S,
        master: &[f32],
        stems: &[&[f32]; 4],
        progress: &mut dyn ProgressSink,
    ) -> Result<()>
    where
        S: ContainerSink + ?Sized,
    {
        let mut open = OpenContainer::open(sink, &ContainerOptions::for_codec(self.settings.codec))?;

        write_track_chunked(
            open.sink(),
            MASTER_TRACK,
            master,
            2,
            self.chunk_frames,
            progress,
        )?;
        for kind in StemKind::ALL {
            write_track_chunked(
                open.sink(),
                kind.track_index(),
                stems[kind.index()],
                2,
                self.chunk_frames,
                progress,
            )?;
        }

        open.close()
    }
}

/// Puts the stems in canonical order, rejecting missing or unknown names.
fn ordered_stems(stems: &HashMap<String, Vec<f32>>) -> Result<[&[f32]; 4]> {
    if let Some(unknown) = stems
        .keys()
        .find(|name| name.parse::<StemKind>().is_err())
    {
        return Err(StemError::config(format!("unexpected stem `{unknown}`")));
    }

    let get = |kind: StemKind| {
        stems
            .get(kind.name())
            .map(Vec::as_slice)
            .ok_or_else(|| StemError::config(format!("missing stem `{kind}`")))
    };

    Ok([
        get(StemKind::Drums)?,
        get(StemKind::Bass)?,
        get(StemKind::Other)?,
        get(StemKind::Vocals)?,
    ])
}
