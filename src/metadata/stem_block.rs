use std::{
    fs::File,
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    error::{Result, StemError},
    metadata::mp4_atom::{scan_top_level, Atom, BoxHeader, FourCc, MOOF, MOOV, UDTA},
    types::{Color, StemKind, StemOverrides, MAX_STEM_LABEL_LENGTH},
};

pub const STEM_ATOM: FourCc = *b"stem";
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemEntry {
    pub color: Color,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Compressor {
    pub enabled: bool,
    pub ratio: i32,
    pub output_gain: i32,
    pub release: f64,
    pub attack: f64,
    pub input_gain: i32,
    pub threshold: i32,
    pub hp_cutoff: i32,
    pub dry_wet: i32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio: 10,
            output_gain: 0,
            release: 1.0,
            attack: 0.0001,
            input_gain: 0,
            threshold: 0,
            hp_cutoff: 20,
            dry_wet: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Limiter {
    pub enabled: bool,
    pub release: f64,
    pub threshold: i32,
    pub ceiling: i32,
}

impl Default for Limiter {
    fn default() -> Self {
        Self {
            enabled: false,
            release: 1.0,
            threshold: 0,
            ceiling: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MasteringDsp {
    pub compressor: Compressor,
    pub limiter: Limiter,
}

/// Stem names and colors as read by stem-aware players.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StemManifest {
    pub stems: Vec<StemEntry>,
    pub mastering_dsp: MasteringDsp,
    pub version: u32,
}

impl Default for StemManifest {
    fn default() -> Self {
        Self::resolve(&StemOverrides::default())
    }
}

impl StemManifest {
    /// All four entries, each taking the override when present and the default otherwise.
    pub fn resolve(overrides: &StemOverrides) -> Self {
        let stems = StemKind::ALL
            .iter()
            .map(|&kind| StemEntry {
                color: overrides.color(kind).unwrap_or_else(|| kind.default_color()),
                name: overrides
                    .label(kind)
                    .unwrap_or_else(|| kind.default_label())
                    .to_string(),
            })
            .collect();

        Self {
            stems,
            mastering_dsp: MasteringDsp::default(),
            version: MANIFEST_VERSION,
        }
    }

    pub fn entry(&self, kind: StemKind) -> Option<&StemEntry> {
        self.stems.get(kind.index())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stems.len() != StemKind::ALL.len() {
            return Err(StemError::StemBlock(format!(
                "stem block needs {} entries, got {}",
                StemKind::ALL.len(),
                self.stems.len()
            )));
        }
        if let Some(e) = self
            .stems
            .iter()
            .find(|e| e.name.chars().count() > MAX_STEM_LABEL_LENGTH)
        {
            return Err(StemError::StemBlock(format!(
                "stem name `{}` is longer than {MAX_STEM_LABEL_LENGTH} characters",
                e.name
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Reads and writes the stem block of a finished container.
pub trait StemBlockStore {
    fn read(&self, path: &Path) -> Result<Option<StemManifest>>;
    fn write(&self, path: &Path, manifest: &StemManifest) -> Result<()>;
}

/// Stores the manifest as the payload of `moov/udta/stem`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp4StemBlock;

fn locate_moov(headers: &[BoxHeader]) -> Result<BoxHeader> {
    if headers.iter().any(|h| h.kind == MOOF) {
        return Err(StemError::StemBlock(
            "fragmented MP4 files are not supported".into(),
        ));
    }
    headers
        .iter()
        .find(|h| h.kind == MOOV)
        .copied()
        .ok_or_else(|| StemError::StemBlock("no `moov` box found".into()))
}

fn read_moov(file: &mut File, header: &BoxHeader) -> Result<Atom> {
    file.seek(SeekFrom::Start(header.offset))?;
    let mut buf = vec![0u8; header.size as usize];
    file.read_exact(&mut buf)?;
    Atom::parse_box(&buf)
}

fn copy_range<W: Write>(file: &mut File, start: u64, len: u64, out: &mut W) -> Result<()> {
    file.seek(SeekFrom::Start(start))?;
    let mut limited = (&mut *file).take(len);
    let copied = io::copy(&mut limited, out)?;
    if copied != len {
        return Err(StemError::StemBlock(format!(
            "short read while copying media data ({copied} of {len} bytes)"
        )));
    }
    Ok(())
}

impl StemBlockStore for Mp4StemBlock {
    fn read(&self, path: &Path) -> Result<Option<StemManifest>> {
        let mut file = File::open(path)?;
        let headers = scan_top_level(&mut file)?;
        let header = locate_moov(&headers)?;
        let moov = read_moov(&mut file, &header)?;

        let payload = moov
            .child(UDTA)
            .and_then(|udta| udta.child(STEM_ATOM))
            .and_then(Atom::data);
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, path: &Path, manifest: &StemManifest) -> Result<()> {
        manifest.validate()?;
        let json = manifest.to_json()?;

        let mut file = File::open(path)?;
        let headers = scan_top_level(&mut file)?;
        let header = locate_moov(&headers)?;
        let file_len = headers.last().map(BoxHeader::end).unwrap_or(0);

        let mut moov = read_moov(&mut file, &header)?;
        moov.ensure_container(UDTA)?
            .set_child(Atom::leaf(STEM_ATOM, json.into_bytes()))?;

        let delta = moov.encoded_len() as i64 - header.size as i64;
        if delta != 0 {
            moov.shift_chunk_offsets(header.end(), delta)?;
        }
        debug!(
            "rewriting moov of {} ({} -> {} bytes)",
            path.display(),
            header.size,
            moov.encoded_len()
        );

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file());
            copy_range(&mut file, 0, header.offset, &mut out)?;
            out.write_all(&moov.to_bytes())?;
            copy_range(&mut file, header.end(), file_len - header.end(), &mut out)?;
            out.flush()?;
        }
        drop(file);

        tmp.persist(path).map_err(|e| StemError::Io(e.error))?;
        Ok(())
    }
}
