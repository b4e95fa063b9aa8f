mod common;

use std::{fs, path::PathBuf};

use common::{FakeDecoder, FakeTagStore, MemoryStemBlock, ScriptedSeparator, SinkRecorder};
use stemgen::{
    Codec, CreateInputs, CreateOptions, GenerateOptions, OutputSettings, SampleRate,
    StemBlockStore, StemGenerator, StemKind, StemManifest, StemOverrides,
};
use tempfile::tempdir;

struct Harness {
    sinks: SinkRecorder,
    blocks: MemoryStemBlock,
    tags: FakeTagStore,
}

impl Harness {
    fn new() -> Self {
        Self {
            sinks: SinkRecorder::default(),
            blocks: MemoryStemBlock::default(),
            tags: FakeTagStore::default(),
        }
    }

    fn generator(&self, decoder: FakeDecoder) -> StemGenerator {
        StemGenerator::new(
            Box::new(decoder),
            Box::new(ScriptedSeparator::quiet()),
            self.sinks.factory(),
            Box::new(self.tags.clone()),
            Box::new(self.blocks.clone()),
        )
    }
}

fn opts(dir: PathBuf) -> GenerateOptions {
    GenerateOptions {
        output_dir: dir,
        ..Default::default()
    }
}

#[test]
fn generate_writes_five_aac_tracks_with_default_stem_block() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(4410));

    let report = generator
        .generate(&tmp.path().join("in/track01.mp3"), &opts(tmp.path().into()))
        .unwrap();

    assert_eq!(report.output, tmp.path().join("track01.stem.mp4"));
    assert_eq!(report.frames, 4410);

    assert_eq!(h.sinks.count(), 1);
    let sink = h.sinks.last();
    let log = sink.log.borrow();
    assert_eq!(log.tracks.len(), 5);
    assert!(log
        .tracks
        .iter()
        .all(|t| t.codec == Codec::Aac && t.encoder_sample_rate == 44_100));
    assert_eq!(log.frames_per_track(), vec![4410; 5]);
    assert_eq!(log.closed, 1);

    let manifest = h.blocks.read(&report.output).unwrap().unwrap();
    assert_eq!(manifest, StemManifest::default());
}

#[test]
fn generate_applies_stem_overrides() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(100));
    let mut o = opts(tmp.path().into());
    o.overrides = StemOverrides::default()
        .with_label(StemKind::Drums, "Kicks")
        .unwrap()
        .with_color(StemKind::Drums, "#112233")
        .unwrap();

    let report = generator.generate(&tmp.path().join("song.wav"), &o).unwrap();

    let manifest = h.blocks.read(&report.output).unwrap().unwrap();
    assert_eq!(manifest.stems[0].name, "Kicks");
    assert_eq!(manifest.stems[0].color.to_string(), "#112233");
    assert_eq!(manifest.stems[1..], StemManifest::default().stems[1..]);
}

#[test]
fn unreadable_tags_become_a_warning() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(100));

    let report = generator
        .generate(&tmp.path().join("song.wav"), &opts(tmp.path().into()))
        .unwrap();

    assert_eq!(report.metadata_warnings.len(), 1);
    assert!(h.blocks.read(&report.output).unwrap().is_some());
}

#[test]
fn existing_output_needs_force() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("song.stem.mp4"), b"old").unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(100));
    let input = tmp.path().join("song.wav");

    let err = generator
        .generate(&input, &opts(tmp.path().into()))
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(h.sinks.count(), 0);

    let mut forced = opts(tmp.path().into());
    forced.force = true;
    assert!(generator.generate(&input, &forced).is_ok());
}

#[test]
fn invalid_extension_and_opus_rate_are_rejected_up_front() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(100));
    let input = tmp.path().join("song.wav");

    let mut bad_ext = opts(tmp.path().into());
    bad_ext.extension = "stem.wav".into();
    assert!(generator.generate(&input, &bad_ext).unwrap_err().is_configuration());

    let mut m4a = opts(tmp.path().into());
    m4a.extension = ".m4a".into();
    assert!(m4a.validate().is_ok());
    assert_eq!(
        m4a.destination(&input).unwrap(),
        tmp.path().join("song.m4a")
    );

    let mut opus = opts(tmp.path().into());
    opus.settings = OutputSettings::new(Codec::Opus, SampleRate::Hz44100);
    assert!(generator.generate(&input, &opus).unwrap_err().is_configuration());

    assert_eq!(h.sinks.count(), 0);
}

#[test]
fn container_failure_removes_partial_output() {
    let tmp = tempdir().unwrap();
    let h = Harness {
        sinks: SinkRecorder::failing_on_chunk(2),
        ..Harness::new()
    };
    let mut generator = h.generator(FakeDecoder::new(100));

    let err = generator
        .generate(&tmp.path().join("song.wav"), &opts(tmp.path().into()))
        .unwrap_err();

    assert!(!err.is_configuration());
    assert!(!tmp.path().join("song.stem.mp4").exists());
    assert_eq!(h.sinks.last().log.borrow().closed, 1);
    assert!(h.blocks.written.borrow().is_empty());
}

#[test]
fn batch_continues_after_a_failing_file() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let mut generator = h.generator(FakeDecoder::new(100));
    let inputs = vec![
        tmp.path().join("one.wav"),
        tmp.path().join("broken.wav"),
        tmp.path().join("three.wav"),
    ];

    let batch = generator.generate_batch(&inputs, &opts(tmp.path().join("out")));

    assert!(batch.has_failure());
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].0, inputs[1]);
    let outputs: Vec<_> = batch.outputs.iter().map(|r| r.output.clone()).collect();
    assert_eq!(
        outputs,
        vec![
            tmp.path().join("out/one.stem.mp4"),
            tmp.path().join("out/three.stem.mp4"),
        ]
    );

    // The failing file never reached the container stage, the others got their own sink.
    assert_eq!(h.sinks.destinations(), outputs);
    for i in 0..h.sinks.count() {
        let sink = h.sinks.session(i);
        let log = sink.log.borrow();
        assert_eq!(log.frames_per_track(), vec![100; 5]);
        assert_eq!(log.closed, 1);
    }
}

#[test]
fn create_packs_existing_stems_and_checks_lengths() {
    let tmp = tempdir().unwrap();
    let h = Harness::new();
    let inputs = CreateInputs {
        master: tmp.path().join("master.wav"),
        drums: tmp.path().join("drums.wav"),
        bass: tmp.path().join("bass.wav"),
        other: tmp.path().join("other.wav"),
        vocals: tmp.path().join("vocals.wav"),
    };
    let output = tmp.path().join("pack.stem.mp4");

    let mut generator = h.generator(FakeDecoder::new(300));
    let report = generator
        .create(&output, &inputs, &CreateOptions::default())
        .unwrap();
    assert_eq!(report.frames, 300);
    assert_eq!(h.sinks.last().log.borrow().frames_per_track(), vec![300; 5]);

    let mut uneven = FakeDecoder::new(300);
    uneven.per_path_frames.insert(inputs.bass.clone(), 299);
    let h2 = Harness::new();
    let err = h2
        .generator(uneven)
        .create(&tmp.path().join("other.stem.mp4"), &inputs, &CreateOptions::default())
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(h2.sinks.count(), 0);
}
