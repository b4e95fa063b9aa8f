use log::trace;

use crate::{
    container::sink::ContainerSink,
    error::{Result, StemError},
    io::progress::ProgressSink,
};

/// Largest number of frames handed to the sink in one call.
pub const CHUNK_FRAMES: usize = 1_024_000;

/// Writes one interleaved track in chunks of at most `chunk_frames` frames.
///
/// Each chunk's frame count goes to `progress` only after the sink accepted it.
/// The first failing write aborts and is returned as is.
pub fn write_track_chunked<S>(
    sink: &mut S,
    track: usize,
    samples: &[f32],
    channels: u16,
    chunk_frames: usize,
    progress: &mut dyn ProgressSink,
) -> Result<u64>
where
    S: ContainerSink + ?Sized,
{
    if channels == 0 || chunk_frames == 0 {
        return Err(StemError::config("track writer needs channels and a chunk size"));
    }
    let channels = channels as usize;
    if samples.len() % channels != 0 {
        return Err(StemError::config(format!(
            "track {track} has {} samples, not a multiple of {channels} channels",
            samples.len()
        )));
    }

    let mut written = 0u64;
    for chunk in samples.chunks(chunk_frames * channels) {
        let frames = (chunk.len() / channels) as u64;
        sink.write_chunk(track, chunk)?;
        written += frames;
        trace!("track {track}: wrote {frames} frames ({written} total)");
        progress.advance(frames);
    }
    Ok(written)
}

/// [`write_track_chunked`] for stereo input and the default chunk bound.
pub fn write_track<S>(
    sink: &mut S,
    track: usize,
    samples: &[f32],
    progress: &mut dyn ProgressSink,
) -> Result<u64>
where
    S: ContainerSink + ?Sized,
{
    write_track_chunked(sink, track, samples, 2, CHUNK_FRAMES, progress)
}
