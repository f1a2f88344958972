use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use scriptsync::Error;
use scriptsync::cache::{OverwriteAnswer, OverwritePolicy, Prompter, TranscriptCache};
use scriptsync::opts::CacheOpts;
use scriptsync::segments::Segment;

/// Replays canned answers and records which entries it was asked about.
#[derive(Clone, Default)]
struct ScriptedPrompter {
    answers: Arc<Mutex<VecDeque<OverwriteAnswer>>>,
    asked: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedPrompter {
    fn new(answers: impl IntoIterator<Item = OverwriteAnswer>) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers.into_iter().collect())),
            asked: Arc::default(),
        }
    }

    fn times_asked(&self) -> usize {
        self.asked.lock().unwrap().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm_overwrite(&self, entry: &Path) -> scriptsync::Result<OverwriteAnswer> {
        self.asked.lock().unwrap().push(entry.to_path_buf());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .expect("prompter asked more often than scripted"))
    }
}

fn opts(dir: &Path, overwrite: OverwritePolicy) -> CacheOpts {
    CacheOpts {
        enabled: true,
        dir: dir.to_path_buf(),
        overwrite,
    }
}

fn transcript(text: &str) -> anyhow::Result<Vec<Segment>> {
    Ok(vec![
        Segment::new(format!("{text} one"), 0.0, 4.5)?,
        Segment::new(format!("{text} two"), 4.5, 9.25)?,
    ])
}

#[test]
fn stored_transcripts_load_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Never), "tiny");
    let source = Path::new("/books/moby.m4b");

    assert_eq!(cache.get(source, 2)?, None);

    let stored = cache.put(source, 2, transcript("call me")?)?;
    assert_eq!(stored, transcript("call me")?);
    assert!(dir.path().join("moby.m4b.2.tiny.subs").is_file());

    assert_eq!(cache.get(source, 2)?, Some(transcript("call me")?));
    // Same file name in another directory shares the entry.
    assert_eq!(
        cache.get(Path::new("/elsewhere/moby.m4b"), 2)?,
        Some(transcript("call me")?)
    );
    // Other chapters and models don't.
    assert_eq!(cache.get(source, 3)?, None);
    let other_model = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Never), "small");
    assert_eq!(other_model.get(source, 2)?, None);
    Ok(())
}

#[test]
fn empty_transcripts_are_cached_too() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Never), "tiny");

    cache.put(Path::new("silence.wav"), 0, Vec::new())?;
    assert_eq!(cache.get(Path::new("silence.wav"), 0)?, Some(Vec::new()));
    Ok(())
}

#[test]
fn disabled_cache_never_touches_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache_dir = dir.path().join("cache");
    let cache = TranscriptCache::new(
        &CacheOpts {
            enabled: false,
            dir: cache_dir.clone(),
            overwrite: OverwritePolicy::Always,
        },
        "tiny",
    );

    assert!(!cache.is_enabled());
    let segments = cache.put(Path::new("a.m4b"), 0, transcript("x")?)?;
    assert_eq!(segments, transcript("x")?);
    assert_eq!(cache.get(Path::new("a.m4b"), 0)?, None);
    assert!(!cache_dir.exists());
    Ok(())
}

#[test]
fn malformed_entries_are_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Never), "tiny");
    let source = Path::new("book.m4b");
    let entry = cache.entry_path(source, 0);

    let cases = [
        "not json at all".to_owned(),
        r#"{"format":"something-else","version":1,"source":"book.m4b","chapter_id":0,"model":"tiny","segments":[]}"#.to_owned(),
        r#"{"format":"scriptsync-transcript","version":99,"source":"book.m4b","chapter_id":0,"model":"tiny","segments":[]}"#.to_owned(),
        r#"{"format":"scriptsync-transcript","version":1,"source":"book.m4b","chapter_id":0,"model":"large","segments":[]}"#.to_owned(),
        r#"{"format":"scriptsync-transcript","version":1,"source":"book.m4b","chapter_id":0,"model":"tiny","segments":[{"text":"x","start_seconds":5.0,"end_seconds":1.0}]}"#.to_owned(),
    ];

    for body in cases {
        fs::write(&entry, &body)?;
        let err = cache.get(source, 0).unwrap_err();
        assert!(
            matches!(err, Error::CacheMalformed { ref path, .. } if path == &entry),
            "unexpected error for {body}: {err}"
        );
    }
    Ok(())
}

#[test]
fn never_policy_keeps_the_first_transcript() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prompter = ScriptedPrompter::new([]);
    let cache = TranscriptCache::with_prompter(
        &opts(dir.path(), OverwritePolicy::Never),
        "tiny",
        prompter.clone(),
    );
    let source = Path::new("book.m4b");

    cache.put(source, 0, transcript("first")?)?;
    let returned = cache.put(source, 0, transcript("second")?)?;

    // The caller still gets its fresh transcript back.
    assert_eq!(returned, transcript("second")?);
    assert_eq!(cache.get(source, 0)?, Some(transcript("first")?));
    assert_eq!(prompter.times_asked(), 0);
    Ok(())
}

#[test]
fn always_policy_replaces_entries() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Always), "tiny");
    let source = Path::new("book.m4b");

    cache.put(source, 0, transcript("first")?)?;
    cache.put(source, 0, transcript("second")?)?;

    assert_eq!(cache.get(source, 0)?, Some(transcript("second")?));
    Ok(())
}

#[test]
fn ask_policy_follows_the_answers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prompter = ScriptedPrompter::new([
        OverwriteAnswer::No,
        OverwriteAnswer::Yes,
        OverwriteAnswer::AlwaysNo,
    ]);
    let cache = TranscriptCache::with_prompter(
        &opts(dir.path(), OverwritePolicy::Ask),
        "tiny",
        prompter.clone(),
    );
    let source = Path::new("book.m4b");

    // New entries are written without asking.
    cache.put(source, 0, transcript("v1")?)?;
    cache.put(source, 1, transcript("other")?)?;
    assert_eq!(prompter.times_asked(), 0);

    // n
    cache.put(source, 0, transcript("v2")?)?;
    assert_eq!(cache.get(source, 0)?, Some(transcript("v1")?));

    // y
    cache.put(source, 0, transcript("v3")?)?;
    assert_eq!(cache.get(source, 0)?, Some(transcript("v3")?));
    assert_eq!(cache.policy()?, OverwritePolicy::Ask);

    // N switches the policy; later collisions are not asked about.
    cache.put(source, 0, transcript("v4")?)?;
    assert_eq!(cache.policy()?, OverwritePolicy::Never);
    cache.put(source, 1, transcript("v5")?)?;

    assert_eq!(prompter.times_asked(), 3);
    assert_eq!(cache.get(source, 0)?, Some(transcript("v3")?));
    assert_eq!(cache.get(source, 1)?, Some(transcript("other")?));
    Ok(())
}

#[test]
fn always_yes_switches_policy_for_the_rest_of_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prompter = ScriptedPrompter::new([OverwriteAnswer::AlwaysYes]);
    let cache = TranscriptCache::with_prompter(
        &opts(dir.path(), OverwritePolicy::Ask),
        "tiny",
        prompter.clone(),
    );
    let source = Path::new("book.m4b");

    cache.put(source, 0, transcript("a")?)?;
    cache.put(source, 1, transcript("b")?)?;
    cache.put(source, 0, transcript("c")?)?;
    cache.put(source, 1, transcript("d")?)?;

    assert_eq!(prompter.times_asked(), 1);
    assert_eq!(cache.policy()?, OverwritePolicy::Always);
    assert_eq!(cache.get(source, 0)?, Some(transcript("c")?));
    assert_eq!(cache.get(source, 1)?, Some(transcript("d")?));
    Ok(())
}

#[test]
fn concurrent_writers_with_distinct_keys() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = TranscriptCache::new(&opts(dir.path(), OverwritePolicy::Never), "tiny");

    std::thread::scope(|s| {
        for chapter in 0..8u64 {
            let cache = &cache;
            s.spawn(move || {
                let text = format!("chapter {chapter}");
                cache
                    .put(Path::new("book.m4b"), chapter, transcript(&text).unwrap())
                    .unwrap();
            });
        }
    });

    for chapter in 0..8u64 {
        let text = format!("chapter {chapter}");
        assert_eq!(
            cache.get(Path::new("book.m4b"), chapter)?,
            Some(transcript(&text)?)
        );
    }

    // Only finished entries remain in the directory.
    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_none_or(|ext| ext != "subs"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}
