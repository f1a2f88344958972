//! High-level API for aligning audiobooks with their scripts.
//!
//! `ScriptSync` owns the long-lived pieces of a run:
//! - a [`WindowedDecoder`] wrapping the loaded model (expensive to build, reused per chapter)
//! - the [`TranscriptCache`]
//!
//! A run extracts chapters from every audio file, matches script files to them by name,
//! transcribes every chapter (through the cache), and writes one WebVTT file per audio file.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backend::Transcriber;
use crate::cache::TranscriptCache;
use crate::chapters::{Chapter, base_name, extract_chapters};
use crate::matcher::{ScriptMatch, StreamLabels, match_scripts};
use crate::opts::Opts;
use crate::segment_encoder::SegmentEncoder;
use crate::segments::Segment;
use crate::vtt_encoder::VttEncoder;
use crate::windowed::WindowedDecoder;
use crate::{Error, Result};

/// Inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Audio files, in reading order.
    pub audio_files: Vec<PathBuf>,
    /// Script files; their file names are what gets matched.
    pub scripts: Vec<PathBuf>,
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One entry per script, in request order.
    pub matches: Vec<ScriptMatch>,
    /// Audio files that could not be read, with the reason.
    pub failed_files: Vec<(PathBuf, String)>,
    /// Subtitle files written.
    pub outputs: Vec<PathBuf>,
}

/// Progress notifications emitted while a run is underway.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// Chapter extraction finished; this many chapters will be transcribed.
    Planned { chapters: usize },
    ChapterStarted(&'a Chapter),
    ChapterFinished(&'a Chapter),
}

/// The main alignment entry point.
pub struct ScriptSync<T: Transcriber> {
    decoder: WindowedDecoder<T>,
    cache: TranscriptCache,
    output_dir: PathBuf,
}

impl<T: Transcriber> ScriptSync<T> {
    /// Build a run with a console-prompting cache configured from `opts`.
    pub fn new(transcriber: T, opts: &Opts) -> Result<Self> {
        let cache = TranscriptCache::new(&opts.cache, opts.model_name.clone());
        Self::with_cache(transcriber, opts, cache)
    }

    pub fn with_cache(transcriber: T, opts: &Opts, cache: TranscriptCache) -> Result<Self> {
        Ok(Self {
            decoder: WindowedDecoder::new(transcriber, opts.decode.clone())?,
            cache,
            output_dir: opts.output_dir.clone(),
        })
    }

    pub fn cache(&self) -> &TranscriptCache {
        &self.cache
    }

    pub fn decoder(&self) -> &WindowedDecoder<T> {
        &self.decoder
    }

    /// Segments for one chapter, in chapter-relative time.
    ///
    /// Served from the cache when possible; otherwise decoded and then stored.
    pub fn transcribe_chapter(&mut self, chapter: &Chapter) -> Result<Vec<Segment>> {
        let source = chapter.source_path();
        if let Some(segments) = self.cache.get(source, chapter.id())? {
            info!(
                file = %source.display(),
                chapter = chapter.index(),
                "using cached transcript"
            );
            return Ok(segments);
        }

        let samples = chapter.samples()?;
        info!(
            file = %source.display(),
            chapter = chapter.index(),
            label = chapter.label(),
            seconds = samples.len() as f64 / f64::from(crate::audio_pipeline::TARGET_SAMPLE_RATE),
            "transcribing chapter"
        );

        let segments = self.decoder.decode(&samples)?;
        self.cache.put(source, chapter.id(), segments)
    }

    pub fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        self.run_with(request, |_| {})
    }

    /// Like [`ScriptSync::run`], reporting progress through `on_event`.
    ///
    /// Audio files that can't be opened or decoded are recorded in the report and skipped,
    /// and no subtitle file is written for them. Any other failure aborts the run.
    pub fn run_with<F>(&mut self, request: &RunRequest, mut on_event: F) -> Result<RunReport>
    where
        F: FnMut(RunEvent<'_>),
    {
        let mut report = RunReport::default();

        let mut books: Vec<(PathBuf, Vec<Chapter>)> = Vec::with_capacity(request.audio_files.len());
        for path in &request.audio_files {
            match extract_chapters(path) {
                Ok(chapters) => books.push((path.clone(), chapters)),
                Err(err @ Error::MediaRead { .. }) => {
                    warn!(file = %path.display(), error = %err, "skipping unreadable audio file");
                    report.failed_files.push((path.clone(), err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        let streams: Vec<StreamLabels> = books
            .iter()
            .map(|(path, chapters)| StreamLabels {
                name: base_name(path),
                chapters: chapters.iter().map(|c| c.label().to_owned()).collect(),
            })
            .collect();
        let scripts: Vec<String> = request.scripts.iter().map(|p| base_name(p)).collect();

        report.matches = match_scripts(&scripts, &streams);
        for (script, m) in scripts.iter().zip(&report.matches) {
            if let Some(a) = m.assignment() {
                info!(
                    script = %script,
                    file = %streams[a.stream].name,
                    chapter = ?a.chapter,
                    score = a.score,
                    "matched script"
                );
            }
        }

        on_event(RunEvent::Planned {
            chapters: books.iter().map(|(_, c)| c.len()).sum(),
        });

        for (path, chapters) in &books {
            match self.transcribe_file(chapters, &mut on_event) {
                Ok(segments) => report.outputs.push(self.write_subtitles(path, &segments)?),
                Err(err @ Error::MediaRead { .. }) => {
                    warn!(file = %path.display(), error = %err, "skipping audio file that failed to decode");
                    report.failed_files.push((path.clone(), err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    /// All chapters of one file, shifted into file time.
    fn transcribe_file<F>(&mut self, chapters: &[Chapter], on_event: &mut F) -> Result<Vec<Segment>>
    where
        F: FnMut(RunEvent<'_>),
    {
        let mut segments = Vec::new();
        for chapter in chapters {
            on_event(RunEvent::ChapterStarted(chapter));
            let offset = chapter.start_seconds();
            for seg in self.transcribe_chapter(chapter)? {
                segments.push(seg.shifted(offset)?);
            }
            on_event(RunEvent::ChapterFinished(chapter));
        }
        Ok(segments)
    }

    fn write_subtitles(&self, audio_path: &Path, segments: &[Segment]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;

        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base_name(audio_path));
        let out_path = self.output_dir.join(format!("{stem}.vtt"));

        let mut encoder = VttEncoder::new(BufWriter::new(File::create(&out_path)?));
        let run_res = segments.iter().try_for_each(|s| encoder.write_segment(s));
        merge_run_and_close(run_res, encoder.close())?;

        info!(output = %out_path.display(), segments = segments.len(), "wrote subtitles");
        Ok(out_path)
    }
}

/// Prefer the write error, but still surface a close failure when writing succeeded.
fn merge_run_and_close(run_res: Result<()>, close_res: Result<()>) -> Result<()> {
    match (run_res, close_res) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(err), _) => Err(err),
        (Ok(()), Err(err)) => Err(err),
    }
}
