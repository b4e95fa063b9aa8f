use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{error, info, warn};

use crate::{
    container::{sink::SinkFactory, stem_writer::StemContainerWriter},
    core::{
        audio::Decoder,
        separator::{run_separation, Separator},
    },
    error::{Result, StemError},
    io::progress::{emit_progress, ReportedProgress, StemProgress},
    metadata::{stem_block::StemBlockStore, synthesizer::MetadataSynthesizer, tags::TagStore},
    types::{OutputSettings, StemKind, StemOverrides},
    utils::DEFAULT_EXTENSION,
};

#[derive(Clone, Debug)]
pub struct GenerateOptions {
    pub output_dir: PathBuf,
    /// Appended to the input's file stem, e.g. `stem.mp4`.
    pub extension: String,
    pub force: bool,
    pub settings: OutputSettings,
    pub overrides: StemOverrides,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            extension: DEFAULT_EXTENSION.into(),
            force: false,
            settings: OutputSettings::default(),
            overrides: StemOverrides::default(),
        }
    }
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let ext = self.extension.trim_start_matches('.').to_ascii_lowercase();
        let ok = ["mp4", "m4a"]
            .iter()
            .any(|e| ext == *e || ext.ends_with(&format!(".{e}")));
        if !ok {
            return Err(StemError::config(format!(
                "extension `{}` must end in .mp4 or .m4a",
                self.extension
            )));
        }
        Ok(())
    }

    /// `<output_dir>/<input file stem>.<extension>`
    pub fn destination(&self, input: &Path) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StemError::config(format!("invalid input path {}", input.display())))?;
        let ext = self.extension.trim_start_matches('.');
        Ok(self.output_dir.join(format!("{stem}.{ext}")))
    }
}

#[derive(Clone, Debug)]
pub struct GenerateReport {
    pub output: PathBuf,
    pub frames: u64,
    pub separation_warnings: Vec<String>,
    pub metadata_warnings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outputs: Vec<GenerateReport>,
    pub failures: Vec<(PathBuf, StemError)>,
}

impl BatchReport {
    pub fn has_failure(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Pre-separated inputs for [`StemGenerator::create`].
#[derive(Clone, Debug)]
pub struct CreateInputs {
    pub master: PathBuf,
    pub drums: PathBuf,
    pub bass: PathBuf,
    pub other: PathBuf,
    pub vocals: PathBuf,
}

impl CreateInputs {
    fn stem(&self, kind: StemKind) -> &Path {
        match kind {
            StemKind::Drums => &self.drums,
            StemKind::Bass => &self.bass,
            StemKind::Other => &self.other,
            StemKind::Vocals => &self.vocals,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub settings: OutputSettings,
    pub overrides: StemOverrides,
    /// Copy tags and artwork from the master file.
    pub copy_tags: bool,
    pub force: bool,
}

/// Runs decode, separate, write, tag for each input.
pub struct StemGenerator {
    decoder: Box<dyn Decoder>,
    separator: Box<dyn Separator>,
    sinks: Box<dyn SinkFactory>,
    tags: Box<dyn TagStore>,
    stem_block: Box<dyn StemBlockStore>,
}

impl StemGenerator {
    pub fn new(
        decoder: Box<dyn Decoder>,
        separator: Box<dyn Separator>,
        sinks: Box<dyn SinkFactory>,
        tags: Box<dyn TagStore>,
        stem_block: Box<dyn StemBlockStore>,
    ) -> Self {
        Self {
            decoder,
            separator,
            sinks,
            tags,
            stem_block,
        }
    }

    /// Symphonia decoding, the external separation script, FFmpeg encoding and lofty tagging.
    #[cfg(feature = "ffmpeg")]
    pub fn with_defaults(shifts: u32) -> Self {
        use crate::{
            container::ffmpeg::FfmpegSink,
            core::{audio::SymphoniaDecoder, separator::CommandSeparator},
            metadata::{stem_block::Mp4StemBlock, tags::LoftyTagStore},
        };

        Self::new(
            Box::new(SymphoniaDecoder),
            Box::new(CommandSeparator::new(shifts)),
            Box::new(FfmpegSink::boxed),
            Box::new(LoftyTagStore),
            Box::new(Mp4StemBlock),
        )
    }

    /// Separates `input` and writes `<output_dir>/<name>.<ext>`.
    pub fn generate(&mut self, input: &Path, opts: &GenerateOptions) -> Result<GenerateReport> {
        opts.validate()?;
        let output = opts.destination(input)?;
        ensure_writable(&output, opts.force)?;

        info!("generating {} from {}", output.display(), input.display());

        emit_progress(StemProgress::Stage("decode"));
        let audio = self.decoder.decode(input, self.separator.sample_rate())?;

        emit_progress(StemProgress::Stage("separate"));
        let mut progress = ReportedProgress::new("separate");
        let separation = run_separation(self.separator.as_mut(), &audio, &mut progress)?;

        let mut report = self.write_stem_file(
            &output,
            &separation.original,
            &separation.stems,
            audio.sample_rate,
            Some(input),
            &opts.settings,
            &opts.overrides,
        )?;
        report.separation_warnings = separation.warnings;
        Ok(report)
    }

    /// Processes every input in order. A failing file is recorded and the batch goes on.
    pub fn generate_batch(&mut self, inputs: &[PathBuf], opts: &GenerateOptions) -> BatchReport {
        let mut batch = BatchReport::default();
        for input in inputs {
            match self.generate(input, opts) {
                Ok(report) => batch.outputs.push(report),
                Err(e) => {
                    error!("{}: {e}", input.display());
                    batch.failures.push((input.clone(), e));
                }
            }
        }
        if batch.has_failure() {
            warn!(
                "{} of {} file(s) failed",
                batch.failures.len(),
                inputs.len()
            );
        }
        batch
    }

    /// Packs an existing master and four stem files, without separation.
    pub fn create(
        &mut self,
        output: &Path,
        inputs: &CreateInputs,
        opts: &CreateOptions,
    ) -> Result<GenerateReport> {
        opts.settings.validate()?;
        ensure_writable(output, opts.force)?;
        let rate = opts.settings.sample_rate.hz();

        emit_progress(StemProgress::Stage("decode"));
        let master = self.decoder.decode(&inputs.master, rate)?;
        let mut stems = HashMap::new();
        for kind in StemKind::ALL {
            let path = inputs.stem(kind);
            let stem = self.decoder.decode(path, rate)?;
            if stem.frames() != master.frames() {
                return Err(StemError::config(format!(
                    "{} has {} frames but the master has {}",
                    path.display(),
                    stem.frames(),
                    master.frames()
                )));
            }
            stems.insert(kind.name().to_string(), stem.samples);
        }

        let source = opts.copy_tags.then_some(inputs.master.as_path());
        self.write_stem_file(
            output,
            &master.samples,
            &stems,
            master.sample_rate,
            source,
            &opts.settings,
            &opts.overrides,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_stem_file(
        &self,
        output: &Path,
        master: &[f32],
        stems: &HashMap<String, Vec<f32>>,
        sample_rate: u32,
        tag_source: Option<&Path>,
        settings: &OutputSettings,
        overrides: &StemOverrides,
    ) -> Result<GenerateReport> {
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        emit_progress(StemProgress::Stage("write_container"));
        let writer = StemContainerWriter::new(settings.clone(), sample_rate);
        let mut progress = ReportedProgress::new("write_container");
        let written = self
            .sinks
            .create(output)
            .and_then(|mut sink| writer.write(&mut sink, master, stems, &mut progress));
        let summary = match written {
            Ok(s) => s,
            Err(e) => {
                discard_partial(output);
                return Err(e);
            }
        };

        emit_progress(StemProgress::Stage("metadata"));
        let synthesizer = MetadataSynthesizer::new(self.tags.as_ref(), self.stem_block.as_ref());
        let meta = synthesizer.synthesize(output, tag_source, overrides)?;

        info!("wrote {}", output.display());
        Ok(GenerateReport {
            output: output.to_path_buf(),
            frames: summary.frames_per_track,
            separation_warnings: Vec::new(),
            metadata_warnings: meta.warnings,
        })
    }
}

fn ensure_writable(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(StemError::config(format!(
            "{} already exists, use force to overwrite",
            output.display()
        )));
    }
    Ok(())
}

fn discard_partial(output: &Path) {
    if output.exists() {
        match fs::remove_file(output) {
            Ok(()) => warn!("removed partial output {}", output.display()),
            Err(e) => error!("could not remove partial output {}: {e}", output.display()),
        }
    }
}
