use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::PathBuf,
    process::{Command, Stdio},
};

use log::{debug, info, warn};
use serde::Deserialize;
use tempfile::tempdir_in;

use crate::{
    core::{
        audio::{read_wav, to_stereo, write_wav},
        shift_progress::{SeparationEvent, ShiftProgress},
    },
    error::{Result, StemError},
    io::progress::ProgressSink,
    types::{AudioData, StemKind},
    utils::{python_bin, separator_script, tmp_dir},
};

/// Output of one separation run: the untouched mix, one buffer per stem name, and
/// whatever the engine complained about along the way.
#[derive(Clone, Debug, Default)]
pub struct Separation {
    pub original: Vec<f32>,
    pub stems: HashMap<String, Vec<f32>>,
    pub warnings: Vec<String>,
}

pub trait Separator {
    /// Rate the engine expects its input at.
    fn sample_rate(&self) -> u32;

    /// Number of passes the engine makes over the input.
    fn shifts(&self) -> u32;

    fn separate(
        &mut self,
        audio: &AudioData,
        on_event: &mut dyn FnMut(&SeparationEvent),
    ) -> Result<Separation>;
}

/// Runs `separator`, turning its resettable offsets into increments for `progress`.
pub fn run_separation<S: Separator + ?Sized>(
    separator: &mut S,
    audio: &AudioData,
    progress: &mut dyn ProgressSink,
) -> Result<Separation> {
    let mut state = ShiftProgress::new(audio.frames() as u64, separator.shifts());
    progress.start(state.total());

    let result = {
        let mut on_event = |event: &SeparationEvent| {
            if let Some(delta) = state.on_event(event) {
                progress.advance(delta);
            }
        };
        separator.separate(audio, &mut on_event)
    };

    let separation = match result {
        Ok(s) => s,
        Err(e) => {
            progress.finish();
            return Err(e);
        }
    };

    let rest = state.finalize();
    progress.advance(rest);
    progress.finish();

    for w in &separation.warnings {
        warn!("separation: {w}");
    }

    Ok(separation)
}

#[derive(Debug, Deserialize)]
struct ProgressLine {
    state: Option<String>,
    segment_offset: Option<u64>,
    length: Option<u64>,
}

impl From<ProgressLine> for SeparationEvent {
    fn from(line: ProgressLine) -> Self {
        SeparationEvent {
            is_start: line.state.as_deref() == Some("start"),
            segment_offset: line.segment_offset,
            shift_length: line.length.unwrap_or(0),
        }
    }
}

/// Parses one stdout line of the separation script. Anything that is not a
/// progress object yields `None`.
pub fn parse_progress_line(line: &str) -> Option<SeparationEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str::<ProgressLine>(line)
        .ok()
        .map(SeparationEvent::from)
}

/// Delegates separation to an external script.
///
/// The script is invoked as `<python> <script> --input in.wav --output <dir> --shifts N`,
/// prints JSON progress lines on stdout and leaves `drums.wav`, `bass.wav`, `other.wav`
/// and `vocals.wav` in the output directory.
#[derive(Clone, Debug)]
pub struct CommandSeparator {
    python: String,
    script: PathBuf,
    shifts: u32,
    sample_rate: u32,
}

impl CommandSeparator {
    pub fn new(shifts: u32) -> Self {
        Self::with_script(python_bin(), separator_script(), shifts)
    }

    pub fn with_script(python: impl Into<String>, script: impl Into<PathBuf>, shifts: u32) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            shifts: shifts.max(1),
            sample_rate: 44_100,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

fn forward_progress(
    reader: impl BufRead,
    on_event: &mut dyn FnMut(&SeparationEvent),
) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        match parse_progress_line(&line) {
            Some(event) => on_event(&event),
            None => debug!("separator: {line}"),
        }
    }
    Ok(())
}

impl Separator for CommandSeparator {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn shifts(&self) -> u32 {
        self.shifts
    }

    fn separate(
        &mut self,
        audio: &AudioData,
        on_event: &mut dyn FnMut(&SeparationEvent),
    ) -> Result<Separation> {
        let scratch_root = tmp_dir();
        fs::create_dir_all(&scratch_root)?;
        let tmp = tempdir_in(&scratch_root)?;
        let input_wav = tmp.path().join("input.wav");
        let out_dir = tmp.path().join("stems");
        fs::create_dir_all(&out_dir)?;

        write_wav(&input_wav, audio)?;
        debug!("wrote separation input to {}", input_wav.display());

        let stderr_path = tmp.path().join("stderr.log");
        let stderr_file = File::create(&stderr_path)?;

        info!(
            "running {} {} with {} shift(s)",
            self.python,
            self.script.display(),
            self.shifts
        );
        let mut child = Command::new(&self.python)
            .arg(&self.script)
            .arg("--input")
            .arg(&input_wav)
            .arg("--output")
            .arg(&out_dir)
            .arg("--shifts")
            .arg(self.shifts.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|e| {
                StemError::Separation(format!("failed to run {}: {e}", self.script.display()))
            })?;

        if let Some(stdout) = child.stdout.take() {
            if let Err(e) = forward_progress(BufReader::new(stdout), on_event) {
                // Reap the script so it does not outlive the run.
                if let Err(kill) = child.kill() {
                    debug!("separator already exited: {kill}");
                }
                let _ = child.wait();
                return Err(StemError::Separation(format!(
                    "reading separator output failed: {e}"
                )));
            }
        }

        let status = child.wait()?;
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();

        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(StemError::Separation(format!(
                "separation script exited with {status}: {}",
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        let warnings = stderr
            .lines()
            .filter_map(|l| {
                let l = l.trim();
                l.get(..8)
                    .filter(|p| p.eq_ignore_ascii_case("warning:"))
                    .map(|_| l[8..].trim().to_string())
            })
            .collect();

        let mut stems = HashMap::new();
        for kind in StemKind::ALL {
            let path = out_dir.join(format!("{}.wav", kind.name()));
            let stem = read_wav(&path).map_err(|e| {
                StemError::Separation(format!("missing stem output {}: {e}", path.display()))
            })?;
            stems.insert(
                kind.name().to_string(),
                to_stereo(&stem.samples, stem.channels),
            );
        }

        Ok(Separation {
            original: audio.samples.clone(),
            stems,
            warnings,
        })
    }
}
