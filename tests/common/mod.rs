#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::HashMap,
    f32::consts::PI,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use stemgen::{
    metadata::mp4_atom::{Atom, CO64, MOOV, STCO},
    AudioData, ContainerOptions, ContainerSink, Cover, Decoder, EncoderConfig, ProgressSink,
    Result, SeparationEvent, Separation, Separator, SinkFactory, StemBlockStore, StemError,
    StemKind, StemManifest, TagSet, TagStore,
};
use stemgen::metadata::tags::SourceTags;

pub fn sine_stereo(frames: usize, sample_rate: u32) -> Vec<f32> {
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        samples.push((2.0 * PI * 440.0 * t).sin() * 0.2);
        samples.push((2.0 * PI * 660.0 * t).sin() * 0.2);
    }
    samples
}

pub fn stems_of(frames: usize) -> HashMap<String, Vec<f32>> {
    StemKind::ALL
        .iter()
        .map(|k| (k.name().to_string(), vec![0.1; frames * 2]))
        .collect()
}

/// Records every call a sink receives.
#[derive(Debug, Default)]
pub struct SinkLog {
    pub tracks: Vec<EncoderConfig>,
    pub opened: Option<ContainerOptions>,
    pub chunks: Vec<(usize, usize)>,
    pub closed: usize,
    pub calls: Vec<&'static str>,
    /// Fail the n-th `write_chunk` call (0-based).
    pub fail_on_chunk: Option<usize>,
}

impl SinkLog {
    pub fn frames_per_track(&self) -> Vec<u64> {
        let mut frames = vec![0u64; self.tracks.len()];
        for (track, samples) in &self.chunks {
            frames[*track] += (*samples / 2) as u64;
        }
        frames
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Rc<RefCell<SinkLog>>,
}

impl RecordingSink {
    pub fn failing_on_chunk(n: usize) -> Self {
        let sink = Self::default();
        sink.log.borrow_mut().fail_on_chunk = Some(n);
        sink
    }
}

impl ContainerSink for RecordingSink {
    fn add_track(&mut self, config: &EncoderConfig) -> Result<usize> {
        let mut log = self.log.borrow_mut();
        log.calls.push("add_track");
        log.tracks.push(*config);
        Ok(log.tracks.len() - 1)
    }

    fn open(&mut self, options: &ContainerOptions) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.calls.push("open");
        log.opened = Some(*options);
        Ok(())
    }

    fn write_chunk(&mut self, track: usize, interleaved: &[f32]) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.calls.push("write_chunk");
        if log.fail_on_chunk == Some(log.chunks.len()) {
            return Err(StemError::Container("disk full".into()));
        }
        log.chunks.push((track, interleaved.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.calls.push("close");
        log.closed += 1;
        Ok(())
    }
}

/// Hands out a fresh [`RecordingSink`] for every destination and keeps each one,
/// touching the file so partial-output cleanup can be observed.
#[derive(Clone, Default)]
pub struct SinkRecorder {
    pub fail_on_chunk: Option<usize>,
    pub sessions: Rc<RefCell<Vec<(PathBuf, RecordingSink)>>>,
}

impl SinkRecorder {
    pub fn failing_on_chunk(n: usize) -> Self {
        Self {
            fail_on_chunk: Some(n),
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.borrow().len()
    }

    pub fn session(&self, index: usize) -> RecordingSink {
        self.sessions.borrow()[index].1.clone()
    }

    pub fn last(&self) -> RecordingSink {
        let sessions = self.sessions.borrow();
        sessions.last().expect("no sink was created").1.clone()
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.sessions.borrow().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn factory(&self) -> Box<dyn SinkFactory> {
        let recorder = self.clone();
        Box::new(move |path: &Path| -> Result<Box<dyn ContainerSink>> {
            fs::write(path, b"partial")?;
            let sink = RecordingSink::default();
            sink.log.borrow_mut().fail_on_chunk = recorder.fail_on_chunk;
            recorder
                .sessions
                .borrow_mut()
                .push((path.to_path_buf(), sink.clone()));
            Ok(Box::new(sink))
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryStemBlock {
    pub written: Rc<RefCell<HashMap<PathBuf, StemManifest>>>,
}

impl StemBlockStore for MemoryStemBlock {
    fn read(&self, path: &Path) -> Result<Option<StemManifest>> {
        Ok(self.written.borrow().get(path).cloned())
    }

    fn write(&self, path: &Path, manifest: &StemManifest) -> Result<()> {
        manifest.validate()?;
        self.written
            .borrow_mut()
            .insert(path.to_path_buf(), manifest.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeTagStore {
    pub source: Option<SourceTags>,
    pub written: Rc<RefCell<Vec<(PathBuf, TagSet, Option<Cover>)>>>,
}

impl TagStore for FakeTagStore {
    fn read_source(&self, path: &Path) -> Result<SourceTags> {
        self.source
            .clone()
            .ok_or_else(|| StemError::Tag(format!("{} is corrupt", path.display())))
    }

    fn write(&self, dest: &Path, tags: &TagSet, cover: Option<&Cover>) -> Result<()> {
        self.written
            .borrow_mut()
            .push((dest.to_path_buf(), tags.clone(), cover.cloned()));
        Ok(())
    }
}

/// Produces a fixed buffer for every path, failing for paths containing "broken".
pub struct FakeDecoder {
    pub frames: usize,
    pub per_path_frames: HashMap<PathBuf, usize>,
}

impl FakeDecoder {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            per_path_frames: HashMap::new(),
        }
    }
}

impl Decoder for FakeDecoder {
    fn decode(&self, path: &Path, sample_rate: u32) -> Result<AudioData> {
        if path.to_string_lossy().contains("broken") {
            return Err(StemError::Decode(format!(
                "no audio stream available in {}",
                path.display()
            )));
        }
        let frames = self
            .per_path_frames
            .get(path)
            .copied()
            .unwrap_or(self.frames);
        Ok(AudioData {
            samples: sine_stereo(frames, sample_rate),
            sample_rate,
            channels: 2,
        })
    }
}

/// Splits the mix into four scaled copies and replays scripted progress offsets.
pub struct ScriptedSeparator {
    pub shifts: u32,
    pub offsets: Vec<Option<u64>>,
    pub warnings: Vec<String>,
}

impl ScriptedSeparator {
    pub fn quiet() -> Self {
        Self {
            shifts: 1,
            offsets: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl Separator for ScriptedSeparator {
    fn sample_rate(&self) -> u32 {
        44_100
    }

    fn shifts(&self) -> u32 {
        self.shifts
    }

    fn separate(
        &mut self,
        audio: &AudioData,
        on_event: &mut dyn FnMut(&SeparationEvent),
    ) -> Result<Separation> {
        let length = audio.frames() as u64;
        on_event(&SeparationEvent::start());
        for offset in &self.offsets {
            on_event(&SeparationEvent {
                is_start: false,
                segment_offset: *offset,
                shift_length: length,
            });
        }
        let stems: HashMap<String, Vec<f32>> = StemKind::ALL
            .iter()
            .map(|k| {
                (
                    k.name().to_string(),
                    audio.samples.iter().map(|s| s * 0.25).collect::<Vec<f32>>(),
                )
            })
            .collect();
        Ok(Separation {
            original: audio.samples.clone(),
            stems,
            warnings: self.warnings.clone(),
        })
    }
}

/// Sums every increment it receives.
#[derive(Debug, Default)]
pub struct CountingProgress {
    pub total: Option<u64>,
    pub deltas: Vec<u64>,
    pub finished: bool,
}

impl CountingProgress {
    pub fn sum(&self) -> u64 {
        self.deltas.iter().sum()
    }
}

impl ProgressSink for CountingProgress {
    fn start(&mut self, total: u64) {
        self.total = Some(total);
    }

    fn advance(&mut self, delta: u64) {
        self.deltas.push(delta);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

/// A tiny faststart MP4: `ftyp`, `moov` with one `stco` table, then `mdat`.
/// Returns the bytes and the payload written into `mdat`.
pub fn minimal_mp4(with_udta: bool) -> (Vec<u8>, Vec<u8>) {
    let payload = b"MEDIA-PAYLOAD-0123456789".to_vec();
    let ftyp = Atom::leaf(*b"ftyp", b"M4A \0\0\0\0isomM4A ".to_vec());

    let build_moov = |chunk_offset: u32| {
        let mut stco = vec![0, 0, 0, 0];
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&chunk_offset.to_be_bytes());

        let mut moov = Atom::container(MOOV);
        moov.set_child(Atom::leaf(*b"mvhd", vec![0; 100])).unwrap();
        let stbl = moov
            .ensure_container(*b"trak")
            .unwrap()
            .ensure_container(*b"mdia")
            .unwrap()
            .ensure_container(*b"minf")
            .unwrap()
            .ensure_container(*b"stbl")
            .unwrap();
        stbl.set_child(Atom::leaf(STCO, stco)).unwrap();
        if with_udta {
            moov.ensure_container(*b"udta")
                .unwrap()
                .set_child(Atom::leaf(*b"name", b"keep me".to_vec()))
                .unwrap();
        }
        moov
    };

    // Sizes do not depend on the offset value, so build once to measure.
    let sized = build_moov(0);
    let offset = ftyp.encoded_len() + sized.encoded_len() + 8;
    let moov = build_moov(offset as u32);

    let mut out = ftyp.to_bytes();
    moov.encode(&mut out);
    Atom::leaf(*b"mdat", payload.clone()).encode(&mut out);
    (out, payload)
}

/// Reads the first chunk offset of the first `stco`/`co64` table in a file.
pub fn first_chunk_offset(bytes: &[u8]) -> u64 {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let atom_len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        if &bytes[offset + 4..offset + 8] == b"moov" {
            let moov = Atom::parse_box(&bytes[offset..offset + atom_len]).unwrap();
            return find_offset(&moov).expect("no chunk offset table");
        }
        offset += atom_len;
    }
    panic!("no moov box");
}

fn find_offset(atom: &Atom) -> Option<u64> {
    if atom.kind == STCO {
        let d = atom.data()?;
        return Some(u32::from_be_bytes(d[8..12].try_into().ok()?) as u64);
    }
    if atom.kind == CO64 {
        let d = atom.data()?;
        return Some(u64::from_be_bytes(d[8..16].try_into().ok()?));
    }
    atom.children().iter().find_map(find_offset)
}
