//! MP4 sink backed by FFmpeg.
//!
//! Every track gets its own encoder. Samples arrive as packed stereo f32 at the
//! decode rate; a first resampler moves them to the encoder rate, the result is
//! cut into encoder-sized frames, and a second converter (same rate) turns each
//! frame into the encoder's sample format.

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    codec, encoder,
    format::{self, sample::Type as SampleType, Sample},
    frame::Audio,
    software::resampling,
    ChannelLayout, Dictionary, Packet, Rational,
};
use log::{debug, trace};

use crate::{
    container::sink::{ContainerOptions, ContainerSink, EncoderConfig},
    error::{Result, StemError},
};

const PACKED_F32: Sample = Sample::F32(SampleType::Packed);
const FALLBACK_FRAME_SIZE: usize = 1024;

fn ff(context: &str) -> impl Fn(ffmpeg_next::Error) -> StemError + '_ {
    move |e| StemError::Container(format!("{context}: {e}"))
}

struct TrackEncoder {
    stream: usize,
    encoder: encoder::Audio,
    rate_stage: Option<resampling::Context>,
    format_stage: resampling::Context,
    frame_size: usize,
    input_rate: u32,
    /// Interleaved samples at the encoder rate not yet sent.
    pending: Vec<f32>,
    pts: i64,
    time_base: Rational,
}

pub struct FfmpegSink {
    path: PathBuf,
    output: format::context::Output,
    tracks: Vec<TrackEncoder>,
    opened: bool,
    closed: bool,
}

impl FfmpegSink {
    pub fn create(path: &Path) -> Result<Self> {
        ffmpeg_next::init().map_err(ff("ffmpeg init"))?;
        let output = format::output(&path).map_err(ff("creating output"))?;
        Ok(Self {
            path: path.to_path_buf(),
            output,
            tracks: Vec::new(),
            opened: false,
            closed: false,
        })
    }

    /// Factory suitable for [`crate::pipeline::StemGenerator`].
    pub fn boxed(path: &Path) -> Result<Box<dyn ContainerSink>> {
        Ok(Box::new(Self::create(path)?))
    }

    fn stream_time_base(&self, stream: usize) -> Rational {
        self.output
            .stream(stream)
            .map(|s| s.time_base())
            .unwrap_or_else(|| Rational::new(1, 1))
    }
}

fn packed_frame(samples: &[f32], rate: u32) -> Audio {
    let frames = samples.len() / 2;
    let mut frame = Audio::new(PACKED_F32, frames, ChannelLayout::STEREO);
    frame.set_rate(rate);
    let bytes = frame.data_mut(0);
    for (dst, s) in bytes.chunks_exact_mut(4).zip(samples) {
        dst.copy_from_slice(&s.to_ne_bytes());
    }
    frame
}

fn unpack(frame: &Audio) -> impl Iterator<Item = f32> + '_ {
    let len = frame.samples() * 2 * 4;
    frame.data(0)[..len]
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}

impl TrackEncoder {
    fn push(
        &mut self,
        samples: &[f32],
        output: &mut format::context::Output,
        stream_tb: Rational,
    ) -> Result<()> {
        match self.rate_stage.as_mut() {
            Some(rate_stage) => {
                let input = packed_frame(samples, self.input_rate);
                let mut resampled = Audio::empty();
                rate_stage
                    .run(&input, &mut resampled)
                    .map_err(ff("resampling"))?;
                self.pending.extend(unpack(&resampled));
            }
            None => self.pending.extend_from_slice(samples),
        }
        self.drain_frames(false, output, stream_tb)
    }

    fn drain_frames(
        &mut self,
        flush: bool,
        output: &mut format::context::Output,
        stream_tb: Rational,
    ) -> Result<()> {
        let frame_len = self.frame_size * 2;
        let mut consumed = 0;
        while self.pending.len() - consumed >= frame_len
            || (flush && self.pending.len() > consumed)
        {
            let end = (consumed + frame_len).min(self.pending.len());
            let chunk = &self.pending[consumed..end];
            let packed = packed_frame(chunk, self.encoder.rate());
            let mut converted = Audio::empty();
            self.format_stage
                .run(&packed, &mut converted)
                .map_err(ff("sample format conversion"))?;
            converted.set_pts(Some(self.pts));
            self.pts += (chunk.len() / 2) as i64;
            self.encoder
                .send_frame(&converted)
                .map_err(ff("encoding"))?;
            self.write_packets(output, stream_tb)?;
            consumed = end;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    fn write_packets(
        &mut self,
        output: &mut format::context::Output,
        stream_tb: Rational,
    ) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream);
            packet.rescale_ts(self.time_base, stream_tb);
            packet
                .write_interleaved(output)
                .map_err(ff("writing packet"))?;
        }
        Ok(())
    }

    fn finish(
        &mut self,
        output: &mut format::context::Output,
        stream_tb: Rational,
    ) -> Result<()> {
        if let Some(rate_stage) = self.rate_stage.as_mut() {
            if rate_stage.delay().is_some() {
                let mut tail = Audio::empty();
                rate_stage.flush(&mut tail).map_err(ff("resampler flush"))?;
                if tail.samples() > 0 {
                    self.pending.extend(unpack(&tail));
                }
            }
        }
        self.drain_frames(true, output, stream_tb)?;
        self.encoder.send_eof().map_err(ff("encoder flush"))?;
        self.write_packets(output, stream_tb)
    }
}

impl ContainerSink for FfmpegSink {
    fn add_track(&mut self, config: &EncoderConfig) -> Result<usize> {
        if self.opened {
            return Err(StemError::Container(
                "tracks must be declared before opening".into(),
            ));
        }
        let codec = encoder::find_by_name(config.codec.encoder_name()).ok_or_else(|| {
            StemError::Container(format!(
                "encoder `{}` is not available",
                config.codec.encoder_name()
            ))
        })?;
        let sample_format = codec
            .audio()
            .map_err(ff("encoder lookup"))?
            .formats()
            .and_then(|mut f| f.next())
            .unwrap_or(Sample::F32(SampleType::Planar));

        let global_header = self
            .output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut stream = self.output.add_stream(codec).map_err(ff("adding stream"))?;
        let stream_index = stream.index();

        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(ff("encoder context"))?;
        let rate = config.encoder_sample_rate as i32;
        enc.set_rate(rate);
        enc.set_channel_layout(ChannelLayout::STEREO);
        enc.set_format(sample_format);
        enc.set_bit_rate(config.bit_rate as usize);
        enc.set_time_base((1, rate));
        enc.compliance(codec::Compliance::Experimental);
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let enc = enc.open_as(codec).map_err(ff("opening encoder"))?;
        stream.set_parameters(&enc);
        stream.set_time_base((1, rate));

        let frame_size = match enc.frame_size() as usize {
            0 => FALLBACK_FRAME_SIZE,
            n => n,
        };

        let rate_stage = if config.sample_rate != config.encoder_sample_rate {
            Some(
                resampling::Context::get(
                    PACKED_F32,
                    ChannelLayout::STEREO,
                    config.sample_rate,
                    PACKED_F32,
                    ChannelLayout::STEREO,
                    config.encoder_sample_rate,
                )
                .map_err(ff("resampler"))?,
            )
        } else {
            None
        };
        let format_stage = resampling::Context::get(
            PACKED_F32,
            ChannelLayout::STEREO,
            config.encoder_sample_rate,
            enc.format(),
            enc.channel_layout(),
            enc.rate(),
        )
        .map_err(ff("format converter"))?;

        debug!(
            "track {stream_index}: {} {} Hz -> {} Hz, frame size {frame_size}",
            config.codec, config.sample_rate, config.encoder_sample_rate
        );

        self.tracks.push(TrackEncoder {
            stream: stream_index,
            encoder: enc,
            rate_stage,
            format_stage,
            frame_size,
            input_rate: config.sample_rate,
            pending: Vec::new(),
            pts: 0,
            time_base: Rational::new(1, rate),
        });
        Ok(self.tracks.len() - 1)
    }

    fn open(&mut self, options: &ContainerOptions) -> Result<()> {
        let mut dict = Dictionary::new();
        if options.experimental {
            dict.set("strict", "experimental");
        }
        self.output
            .write_header_with(dict)
            .map_err(ff("writing header"))?;
        self.opened = true;
        debug!("opened {}", self.path.display());
        Ok(())
    }

    fn write_chunk(&mut self, track: usize, interleaved: &[f32]) -> Result<()> {
        if !self.opened || self.closed {
            return Err(StemError::Container("container is not open".into()));
        }
        let stream = self
            .tracks
            .get(track)
            .map(|t| t.stream)
            .ok_or_else(|| StemError::Container(format!("unknown track {track}")))?;
        let stream_tb = self.stream_time_base(stream);

        trace!("track {track}: {} samples", interleaved.len());
        self.tracks[track].push(interleaved, &mut self.output, stream_tb)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed || !self.opened {
            self.closed = true;
            return Ok(());
        }
        self.closed = true;
        for i in 0..self.tracks.len() {
            let stream_tb = self.stream_time_base(self.tracks[i].stream);
            self.tracks[i].finish(&mut self.output, stream_tb)?;
        }
        self.output
            .write_trailer()
            .map_err(ff("writing trailer"))?;
        debug!("closed {}", self.path.display());
        Ok(())
    }
}
