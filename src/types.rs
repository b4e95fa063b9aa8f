use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemError};

pub const MAX_STEM_LABEL_LENGTH: usize = 32;
pub const DEFAULT_BIT_RATE: u32 = 256_000;

/// Interleaved PCM samples. Everything past the decoder is stereo.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// The four stems, in the order they are stored in the container (tracks 1..=4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StemKind {
    Drums,
    Bass,
    Other,
    Vocals,
}

impl StemKind {
    pub const ALL: [StemKind; 4] = [
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Other,
        StemKind::Vocals,
    ];

    pub fn index(self) -> usize {
        match self {
            StemKind::Drums => 0,
            StemKind::Bass => 1,
            StemKind::Other => 2,
            StemKind::Vocals => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Vocals => "vocals",
        }
    }

    pub fn default_label(self) -> &'static str {
        match self {
            StemKind::Drums => "Drums",
            StemKind::Bass => "Bass",
            StemKind::Other => "Other",
            StemKind::Vocals => "Vocals",
        }
    }

    pub fn default_color(self) -> Color {
        match self {
            StemKind::Drums => Color(0x009E73),
            StemKind::Bass => Color(0xD55E00),
            StemKind::Other => Color(0xCC79A7),
            StemKind::Vocals => Color(0x56B4E9),
        }
    }

    /// Container track holding this stem; track 0 is the master.
    pub fn track_index(self) -> usize {
        self.index() + 1
    }
}

impl fmt::Display for StemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StemKind {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        StemKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| StemError::config(format!("unknown stem `{s}`")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Aac,
    Alac,
    Flac,
    Opus,
}

impl Codec {
    /// FFmpeg encoder to look up. The native `opus` encoder is experimental, so we use libopus.
    pub fn encoder_name(self) -> &'static str {
        match self {
            Codec::Aac => "aac",
            Codec::Alac => "alac",
            Codec::Flac => "flac",
            Codec::Opus => "libopus",
        }
    }

    /// Opus in MP4 is only muxed with relaxed standard compliance.
    pub fn needs_experimental_muxing(self) -> bool {
        matches!(self, Codec::Opus)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Aac => write!(f, "aac"),
            Codec::Alac => write!(f, "alac"),
            Codec::Flac => write!(f, "flac"),
            Codec::Opus => write!(f, "opus"),
        }
    }
}

impl FromStr for Codec {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aac" => Ok(Codec::Aac),
            "alac" => Ok(Codec::Alac),
            "flac" => Ok(Codec::Flac),
            "opus" => Ok(Codec::Opus),
            other => Err(StemError::config(format!("unsupported codec `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleRate {
    #[default]
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
        }
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = StemError;

    fn try_from(hz: u32) -> Result<Self> {
        match hz {
            44_100 => Ok(SampleRate::Hz44100),
            48_000 => Ok(SampleRate::Hz48000),
            other => Err(StemError::config(format!(
                "unsupported sample rate {other}, expected 44100 or 48000"
            ))),
        }
    }
}

impl FromStr for SampleRate {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        let hz: u32 = s
            .trim()
            .parse()
            .map_err(|_| StemError::config(format!("invalid sample rate `{s}`")))?;
        SampleRate::try_from(hz)
    }
}

/// Output encoding shared by the five tracks of a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSettings {
    pub codec: Codec,
    pub sample_rate: SampleRate,
    pub bit_rate: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            codec: Codec::Aac,
            sample_rate: SampleRate::Hz44100,
            bit_rate: DEFAULT_BIT_RATE,
        }
    }
}

impl OutputSettings {
    pub fn new(codec: Codec, sample_rate: SampleRate) -> Self {
        Self {
            codec,
            sample_rate,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.codec == Codec::Opus && self.sample_rate != SampleRate::Hz48000 {
            return Err(StemError::config(format!(
                "opus output requires 48000 Hz, got {}",
                self.sample_rate
            )));
        }
        if self.bit_rate == 0 {
            return Err(StemError::config("bit rate must be positive"));
        }
        Ok(())
    }
}

fn color_pattern() -> &'static Regex {
    static COLOR_RE: OnceLock<Regex> = OnceLock::new();
    COLOR_RE.get_or_init(|| Regex::new("^#[0-9a-fA-F]{6}$").expect("static color pattern"))
}

/// 24-bit RGB color, rendered as `#RRGGBB`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub u32);

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06X}", self.0 & 0x00FF_FFFF)
    }
}

impl FromStr for Color {
    type Err = StemError;

    fn from_str(s: &str) -> Result<Self> {
        if !color_pattern().is_match(s) {
            return Err(StemError::config(format!(
                "the stem color must be in hex-rgb format (e.g #AABBCC), got `{s}`"
            )));
        }
        u32::from_str_radix(&s[1..], 16)
            .map(Color)
            .map_err(|_| StemError::config(format!("invalid color `{s}`")))
    }
}

impl TryFrom<String> for Color {
    type Error = StemError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

/// Caller-supplied label/color replacements, indexed in canonical stem order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StemOverrides {
    labels: [Option<String>; 4],
    colors: [Option<Color>; 4],
}

impl StemOverrides {
    pub fn set_label(&mut self, stem: StemKind, label: impl Into<String>) -> Result<()> {
        let label = label.into();
        if label.chars().count() > MAX_STEM_LABEL_LENGTH {
            return Err(StemError::config(format!(
                "the stem label can only be {MAX_STEM_LABEL_LENGTH} char at max"
            )));
        }
        self.labels[stem.index()] = Some(label);
        Ok(())
    }

    pub fn set_color(&mut self, stem: StemKind, color: &str) -> Result<()> {
        self.colors[stem.index()] = Some(color.parse()?);
        Ok(())
    }

    pub fn with_label(mut self, stem: StemKind, label: impl Into<String>) -> Result<Self> {
        self.set_label(stem, label)?;
        Ok(self)
    }

    pub fn with_color(mut self, stem: StemKind, color: &str) -> Result<Self> {
        self.set_color(stem, color)?;
        Ok(self)
    }

    pub fn label(&self, stem: StemKind) -> Option<&str> {
        self.labels[stem.index()].as_deref()
    }

    pub fn color(&self, stem: StemKind) -> Option<Color> {
        self.colors[stem.index()]
    }
}
