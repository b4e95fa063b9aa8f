use std::{fs::File, path::Path};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, codecs::CODEC_TYPE_NULL, errors::Error as SymError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::{
    error::{Result, StemError},
    types::AudioData,
};

/// Turns an input file into interleaved stereo samples at a fixed rate.
pub trait Decoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioData>;
}

/// Decoder backed by symphonia, resampling with rubato when needed.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioData> {
        let native = read_audio(path)?;
        let stereo = to_stereo(&native.samples, native.channels);

        let samples = if native.sample_rate == sample_rate || stereo.is_empty() {
            stereo
        } else {
            resample_stereo(stereo, native.sample_rate, sample_rate)?
        };

        Ok(AudioData {
            samples,
            sample_rate,
            channels: 2,
        })
    }
}

/// Decodes the first audio stream of `path` at its native rate and channel count.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file: File = File::open(path)?;
    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| StemError::Decode(format!("{}: {e}", path.display())))?;

    let mut format = probed.format;

    let audio_tracks: Vec<_> = format
        .tracks()
        .iter()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .collect();
    let track = match audio_tracks.as_slice() {
        [] => {
            return Err(StemError::Decode(format!(
                "no audio stream available in {}",
                path.display()
            )))
        }
        [only] => *only,
        [first, ..] => {
            warn!(
                "found {} audio streams in {}, using the first one",
                audio_tracks.len(),
                path.display()
            );
            *first
        }
    };
    let track_id = track.id;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymError::DecodeError(msg)) => {
                debug!("skipping corrupt packet in {}: {msg}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(StemError::Decode(format!(
            "could not determine the audio format of {}",
            path.display()
        )));
    }

    debug!(
        "read {}: sample_rate={}, channels={}, samples={}",
        path.display(),
        sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Interleaved stereo from any channel count: mono is duplicated, extra channels are dropped.
pub fn to_stereo(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().flat_map(|&x| [x, x]).collect(),
        2 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n as usize)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

fn resample_stereo(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to as f64 / from as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, 2)
        .map_err(|e| StemError::Decode(format!("resampler setup failed: {e}")))?;
    let input = vec![left, right];
    let out = resampler
        .process(&input, None)
        .map_err(|e| StemError::Decode(format!("resampling failed: {e}")))?;

    debug!("resampled {frames} frames from {from} Hz to {to} Hz");

    Ok(out[0]
        .iter()
        .zip(out[1].iter())
        .flat_map(|(&l, &r)| [l, r])
        .collect())
}

/// Writes 32-bit float WAV, used for scratch files handed to external tools.
pub fn write_wav(path: &Path, audio: &AudioData) -> Result<()> {
    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Reads any PCM WAV into normalized f32 samples.
pub fn read_wav(path: &Path) -> Result<AudioData> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()?
        }
    };

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
