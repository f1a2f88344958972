use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scriptsync::backend::{AudioWindow, DecodeResult, Transcriber, Vocabulary};
use scriptsync::cache::{OverwritePolicy, TranscriptCache};
use scriptsync::matcher::ScriptMatch;
use scriptsync::opts::{CacheOpts, DecodeOpts, Opts};
use scriptsync::{RunEvent, RunRequest, ScriptSync};

const SOT: u32 = 50;
const EOT: u32 = 51;

/// Hears "hello world" in every window and counts how many windows it was given.
struct Greeter {
    vocab: Vocabulary,
    windows: Arc<AtomicUsize>,
}

impl Greeter {
    fn new(windows: Arc<AtomicUsize>) -> Self {
        Self {
            vocab: Vocabulary {
                sot_sequence: vec![SOT],
                eot: EOT,
                timestamp_begin: 100,
                vocab_size: 200,
                text_context: 64,
            },
            windows,
        }
    }
}

impl Transcriber for Greeter {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn transcribe(
        &mut self,
        windows: &[AudioWindow],
        _: &DecodeOpts,
    ) -> scriptsync::Result<Vec<DecodeResult>> {
        self.windows.fetch_add(windows.len(), Ordering::SeqCst);
        Ok(windows
            .iter()
            .map(|_| DecodeResult {
                tokens: vec![SOT, 1, 2, EOT],
                ..DecodeResult::default()
            })
            .collect())
    }

    fn detokenize(&self, tokens: &[u32]) -> scriptsync::Result<String> {
        Ok(tokens
            .iter()
            .map(|t| if *t == 1 { "hello" } else { "world" })
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn write_silence(path: &Path, seconds: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..seconds * 16_000 {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn opts(root: &Path) -> Opts {
    Opts {
        cache: CacheOpts {
            enabled: true,
            dir: root.join("cache"),
            overwrite: OverwritePolicy::Never,
        },
        output_dir: root.join("subs"),
        ..Opts::default()
    }
}

#[test]
fn run_writes_subtitles_and_caches_transcripts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("chapter_one.wav");
    write_silence(&audio, 2)?;
    let broken = dir.path().join("broken.m4b");
    std::fs::write(&broken, b"not audio")?;

    let request = RunRequest {
        audio_files: vec![audio.clone(), broken.clone()],
        scripts: vec![dir.path().join("chapter_one.txt"), dir.path().join("qqq")],
    };

    let windows = Arc::new(AtomicUsize::new(0));
    let opts = opts(dir.path());
    let mut sync = ScriptSync::new(Greeter::new(windows.clone()), &opts)?;

    let mut events = Vec::new();
    let report = sync.run_with(&request, |event| {
        events.push(match event {
            RunEvent::Planned { chapters } => format!("planned {chapters}"),
            RunEvent::ChapterStarted(ch) => format!("start {}", ch.label()),
            RunEvent::ChapterFinished(ch) => format!("finish {}", ch.label()),
        })
    })?;

    assert_eq!(
        events,
        vec!["planned 1", "start chapter_one.wav", "finish chapter_one.wav"]
    );
    assert_eq!(windows.load(Ordering::SeqCst), 1);

    assert_eq!(report.failed_files.len(), 1);
    assert_eq!(report.failed_files[0].0, broken);

    assert_eq!(report.matches.len(), 2);
    match &report.matches[0] {
        ScriptMatch::Matched(a) => {
            assert_eq!(a.stream, 0);
            assert!(a.score > 0.0);
        }
        other => panic!("expected a match, got {other:?}"),
    }
    assert_eq!(report.matches[1], ScriptMatch::Unmatched);

    let out = dir.path().join("subs").join("chapter_one.vtt");
    assert_eq!(report.outputs, vec![out.clone()]);
    let vtt = std::fs::read_to_string(&out)?;
    assert!(vtt.starts_with("WEBVTT\n\n"));
    assert!(vtt.contains(" --> "));
    assert!(vtt.contains("hello world"));

    assert!(dir.path().join("cache").join("chapter_one.wav.0.tiny.subs").is_file());

    // A second run is served from the cache.
    let mut again = ScriptSync::new(Greeter::new(windows.clone()), &opts)?;
    again.run(&request)?;
    assert_eq!(windows.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(&out)?, vtt);
    Ok(())
}

#[test]
fn disabled_cache_transcribes_every_time() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let audio = dir.path().join("intro.wav");
    write_silence(&audio, 1)?;

    let mut opts = opts(dir.path());
    opts.cache.enabled = false;
    let request = RunRequest {
        audio_files: vec![audio],
        scripts: Vec::new(),
    };

    let windows = Arc::new(AtomicUsize::new(0));
    let cache = TranscriptCache::new(&opts.cache, opts.model_name.clone());
    let mut sync = ScriptSync::with_cache(Greeter::new(windows.clone()), &opts, cache)?;
    sync.run(&request)?;
    sync.run(&request)?;

    assert_eq!(windows.load(Ordering::SeqCst), 2);
    assert!(!dir.path().join("cache").exists());
    Ok(())
}

#[test]
fn file_that_fails_after_extraction_is_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let vanishing = dir.path().join("vanishing.wav");
    let kept = dir.path().join("kept.wav");
    write_silence(&vanishing, 1)?;
    write_silence(&kept, 1)?;

    let request = RunRequest {
        audio_files: vec![vanishing.clone(), kept.clone()],
        scripts: Vec::new(),
    };

    let windows = Arc::new(AtomicUsize::new(0));
    let opts = opts(dir.path());
    let mut sync = ScriptSync::new(Greeter::new(windows.clone()), &opts)?;

    // The first file probes fine, then disappears before its audio is decoded.
    let report = sync.run_with(&request, |event| {
        if let RunEvent::Planned { .. } = event {
            std::fs::remove_file(&vanishing).unwrap();
        }
    })?;

    assert_eq!(report.failed_files.len(), 1);
    assert_eq!(report.failed_files[0].0, vanishing);
    assert!(report.failed_files[0].1.contains("failed to read media"));

    let subs = dir.path().join("subs");
    assert_eq!(report.outputs, vec![subs.join("kept.vtt")]);
    assert!(!subs.join("vanishing.vtt").exists());
    assert_eq!(windows.load(Ordering::SeqCst), 1);
    Ok(())
}
