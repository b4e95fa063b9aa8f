use std::{io::Write, path::PathBuf, process};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use stemgen::{
    set_progress_callback, Codec, CreateInputs, CreateOptions, GenerateOptions, OutputSettings,
    SampleRate, StemGenerator, StemKind, StemOverrides, StemProgress,
};

#[derive(Parser)]
#[command(name = "stemgen")]
#[command(about = "Build stem MP4 files from mixes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress and log warnings only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct Encoding {
    #[arg(long, default_value = "aac")]
    codec: Codec,

    #[arg(long, default_value = "44100")]
    sample_rate: SampleRate,

    #[arg(long)]
    drum_stem_label: Option<String>,
    #[arg(long)]
    drum_stem_color: Option<String>,
    #[arg(long)]
    bass_stem_label: Option<String>,
    #[arg(long)]
    bass_stem_color: Option<String>,
    #[arg(long)]
    other_stem_label: Option<String>,
    #[arg(long)]
    other_stem_color: Option<String>,
    #[arg(long)]
    vocal_stem_label: Option<String>,
    #[arg(long)]
    vocal_stem_color: Option<String>,
}

impl Encoding {
    fn settings(&self) -> OutputSettings {
        OutputSettings::new(self.codec, self.sample_rate)
    }

    fn overrides(&self) -> stemgen::Result<StemOverrides> {
        let mut o = StemOverrides::default();
        let pairs = [
            (StemKind::Drums, &self.drum_stem_label, &self.drum_stem_color),
            (StemKind::Bass, &self.bass_stem_label, &self.bass_stem_color),
            (StemKind::Other, &self.other_stem_label, &self.other_stem_color),
            (StemKind::Vocals, &self.vocal_stem_label, &self.vocal_stem_color),
        ];
        for (kind, label, color) in pairs {
            if let Some(label) = label {
                o.set_label(kind, label.clone())?;
            }
            if let Some(color) = color {
                o.set_color(kind, color)?;
            }
        }
        Ok(o)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Separate each file and write one stem file per input
    Generate {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long, env = "STEMGEN_OUTPUT")]
        output: PathBuf,

        #[arg(long, default_value = "stem.mp4")]
        ext: String,

        #[arg(short, long)]
        force: bool,

        /// Separation passes; more is slower but cleaner
        #[arg(long, default_value_t = 1)]
        shifts: u32,

        #[command(flatten)]
        encoding: Encoding,
    },

    /// Pack an existing master and four stems into a stem file
    Create {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        mastered: PathBuf,
        #[arg(long)]
        drum: PathBuf,
        #[arg(long)]
        bass: PathBuf,
        #[arg(long)]
        other: PathBuf,
        #[arg(long)]
        vocal: PathBuf,

        /// Copy tags and cover art from the master
        #[arg(long)]
        copy_tags: bool,

        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        encoding: Encoding,
    },
}

/// `RUST_LOG` still overrides this.
fn log_level(verbose: bool, quiet: bool) -> LevelFilter {
    match (verbose, quiet) {
        (true, _) => LevelFilter::Debug,
        (false, true) => LevelFilter::Warn,
        (false, false) => LevelFilter::Info,
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(log_level(cli.verbose, cli.quiet))
        .parse_default_env()
        .init();

    if !cli.quiet {
        setup_progress_callback();
    }

    let result = match cli.command {
        Commands::Generate {
            files,
            output,
            ext,
            force,
            shifts,
            encoding,
        } => handle_generate(files, output, ext, force, shifts, encoding),
        Commands::Create {
            output,
            mastered,
            drum,
            bass,
            other,
            vocal,
            copy_tags,
            force,
            encoding,
        } => handle_create(
            output,
            CreateInputs {
                master: mastered,
                drums: drum,
                bass,
                other,
                vocals: vocal,
            },
            copy_tags,
            force,
            encoding,
        ),
    };

    match result {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn handle_generate(
    files: Vec<PathBuf>,
    output: PathBuf,
    ext: String,
    force: bool,
    shifts: u32,
    encoding: Encoding,
) -> stemgen::Result<bool> {
    let opts = GenerateOptions {
        output_dir: output,
        extension: ext,
        force,
        settings: encoding.settings(),
        overrides: encoding.overrides()?,
    };
    opts.validate()?;

    let mut generator = StemGenerator::with_defaults(shifts);
    let batch = generator.generate_batch(&files, &opts);

    for report in &batch.outputs {
        for w in report
            .separation_warnings
            .iter()
            .chain(&report.metadata_warnings)
        {
            eprintln!("warning: {w}");
        }
        println!("{}", report.output.display());
    }
    for (input, err) in &batch.failures {
        eprintln!("failed: {}: {err}", input.display());
    }

    Ok(!batch.has_failure())
}

fn handle_create(
    output: PathBuf,
    inputs: CreateInputs,
    copy_tags: bool,
    force: bool,
    encoding: Encoding,
) -> stemgen::Result<bool> {
    let opts = CreateOptions {
        settings: encoding.settings(),
        overrides: encoding.overrides()?,
        copy_tags,
        force,
    };

    let mut generator = StemGenerator::with_defaults(1);
    let report = generator.create(&output, &inputs, &opts)?;
    for w in &report.metadata_warnings {
        eprintln!("warning: {w}");
    }
    println!("{}", report.output.display());
    Ok(true)
}

fn setup_progress_callback() {
    set_progress_callback(|progress| match progress {
        StemProgress::Stage(stage) => {
            let stage_name = match stage {
                "decode" => "Decoding audio",
                "separate" => "Separating stems",
                "write_container" => "Encoding tracks",
                "metadata" => "Writing metadata",
                _ => stage,
            };
            eprintln!("⏳ {}", stage_name);
        }
        StemProgress::Started { .. } => {}
        StemProgress::Advanced { label, done, total } => {
            let percent = if total > 0 {
                done as f64 / total as f64 * 100.0
            } else {
                100.0
            };
            eprint!("\r🔄 {}: {:>3.0}%", label, percent);
            let _ = std::io::stderr().flush();
        }
        StemProgress::Finished { .. } => eprintln!(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_keeps_only_warnings() {
        assert_eq!(log_level(false, true), LevelFilter::Warn);
        assert_eq!(log_level(false, false), LevelFilter::Info);
        assert_eq!(log_level(true, true), LevelFilter::Debug);
    }
}
