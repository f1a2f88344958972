// Align audiobook files with their scripts and write one WebVTT file per audio file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use scriptsync::backends::candle::{CandleWhisper, device_from_name};
use scriptsync::cache::OverwritePolicy;
use scriptsync::logging;
use scriptsync::matcher::ScriptMatch;
use scriptsync::opts::{CacheOpts, DecodeOpts, Opts, StitchStrategy};
use scriptsync::search::ModelTranscriber;
use scriptsync::{RunEvent, RunRequest, ScriptSync};

#[derive(Parser, Debug)]
#[command(name = "scriptsync")]
#[command(about = "Match audio to a transcript", long_about = None)]
struct Args {
    /// Audio files to process, in reading order.
    #[arg(long = "audio-files", num_args = 1.., required = true)]
    audio_files: Vec<PathBuf>,

    /// Script files; matched to audio chapters by file name.
    #[arg(long = "script", num_args = 1.., required = true)]
    script: Vec<PathBuf>,

    /// Whisper model name (a directory under --models-dir).
    #[arg(long, default_value = "tiny")]
    model: String,

    /// Directory holding one sub-directory per model.
    #[arg(long = "models-dir", default_value = "models")]
    models_dir: PathBuf,

    /// Language of the script and audio.
    #[arg(long, default_value = "ja")]
    language: String,

    /// Use the transcript cache (default).
    #[arg(long = "use-cache", overrides_with = "no_use_cache")]
    use_cache: bool,

    /// Always transcribe; never read or write the cache.
    #[arg(long = "no-use-cache", overrides_with = "use_cache")]
    no_use_cache: bool,

    #[arg(long = "cache-dir", default_value = "AudiobookTextSyncCache")]
    cache_dir: PathBuf,

    /// Overwrite existing cache entries without asking.
    #[arg(long = "overwrite-cache")]
    overwrite_cache: bool,

    /// Inference threads.
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Inference device: cpu, cuda or metal.
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Beam width; 1 decodes greedily.
    #[arg(long, default_value_t = 1)]
    beams: usize,

    /// Where subtitle files are written.
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Show a progress bar (default).
    #[arg(long, overrides_with = "no_progress")]
    progress: bool,

    #[arg(long = "no-progress", overrides_with = "progress")]
    no_progress: bool,
}

impl Args {
    fn opts(&self) -> Opts {
        let decode = DecodeOpts {
            beams: self.beams,
            // Beam search keeps no probability traces to align.
            stitch: if self.beams > 1 {
                StitchStrategy::CommonRun
            } else {
                StitchStrategy::LogitTrace
            },
            ..DecodeOpts::default()
        };

        Opts {
            model_name: self.model.clone(),
            language: self.language.clone(),
            decode,
            cache: CacheOpts {
                enabled: self.use_cache || !self.no_use_cache,
                dir: self.cache_dir.clone(),
                overwrite: if self.overwrite_cache {
                    OverwritePolicy::Always
                } else {
                    OverwritePolicy::Ask
                },
            },
            output_dir: self.output_dir.clone(),
        }
    }
}

fn progress_bar(enabled: bool) -> Result<ProgressBar> {
    if !enabled {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
    )?);
    Ok(pb)
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    if args.threads > 0 {
        // SAFETY: still single-threaded; the model's thread pool reads this when first used.
        unsafe { std::env::set_var("RAYON_NUM_THREADS", args.threads.to_string()) };
    }

    let opts = args.opts();
    let device = device_from_name(&args.device)?;
    let model = CandleWhisper::load(&args.models_dir, &args.model, &args.language, device)
        .with_context(|| {
            format!(
                "failed to load model '{}' from '{}'",
                args.model,
                args.models_dir.display()
            )
        })?;

    let mut sync = ScriptSync::new(ModelTranscriber::new(model), &opts)?;
    let request = RunRequest {
        audio_files: args.audio_files.clone(),
        scripts: args.script.clone(),
    };

    let pb = progress_bar(args.progress || !args.no_progress)?;
    let report = sync.run_with(&request, |event| match event {
        RunEvent::Planned { chapters } => pb.set_length(chapters as u64),
        RunEvent::ChapterStarted(chapter) => pb.set_message(chapter.label().to_owned()),
        RunEvent::ChapterFinished(_) => pb.inc(1),
    })?;
    pb.finish_and_clear();

    for (script, m) in request.scripts.iter().zip(&report.matches) {
        match m {
            ScriptMatch::Matched(_) => {}
            ScriptMatch::Unmatched | ScriptMatch::NoCandidates => {
                eprintln!(
                    "couldn't find a script match based on filename: {}",
                    script.display()
                );
            }
        }
    }
    for (path, reason) in &report.failed_files {
        eprintln!("skipped {}: {reason}", path.display());
    }
    for out in &report.outputs {
        println!("{}", out.display());
    }

    Ok(())
}
