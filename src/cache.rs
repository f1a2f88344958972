//! On-disk transcript cache.
//!
//! One file per `(audio file, chapter, model)` named `<base>.<chapter_id>.<model>.subs`,
//! holding a versioned JSON document. Entries are written through a temp file in the cache
//! directory and renamed into place, so readers never observe a partial entry.
//!
//! Overwriting an existing entry is governed by an [`OverwritePolicy`]. With
//! [`OverwritePolicy::Ask`], a [`Prompter`] decides per entry and can switch the policy for
//! the rest of the run.

use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::chapters::base_name;
use crate::opts::CacheOpts;
use crate::segments::Segment;
use crate::{Error, Result};

const FORMAT_TAG: &str = "scriptsync-transcript";
const FORMAT_VERSION: u32 = 1;

/// What to do when a cache entry already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Ask,
    Always,
    Never,
}

/// A reply to an overwrite prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteAnswer {
    /// `y`: overwrite this entry.
    Yes,
    /// `n`: keep this entry.
    No,
    /// `Y`: overwrite this and every later entry.
    AlwaysYes,
    /// `N`: keep this and every later entry.
    AlwaysNo,
}

/// Asks whether an existing cache entry may be replaced.
pub trait Prompter: Send + Sync {
    fn confirm_overwrite(&self, entry: &Path) -> Result<OverwriteAnswer>;
}

/// Prompts on stderr and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn confirm_overwrite(&self, entry: &Path) -> Result<OverwriteAnswer> {
        let stdin = io::stdin();
        let stderr = io::stderr();
        read_answer(&mut stdin.lock(), &mut stderr.lock(), entry)
    }
}

/// Prompt until a valid answer arrives. End of input counts as "never overwrite".
fn read_answer(
    input: &mut impl BufRead,
    output: &mut impl Write,
    entry: &Path,
) -> Result<OverwriteAnswer> {
    loop {
        write!(
            output,
            "Overwrite cached transcript '{}'? [y/n/Y/N] ",
            entry.display()
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            warn!(entry = %entry.display(), "no answer on stdin; keeping existing cache entries");
            return Ok(OverwriteAnswer::AlwaysNo);
        }

        match line.trim() {
            "y" => return Ok(OverwriteAnswer::Yes),
            "n" => return Ok(OverwriteAnswer::No),
            "Y" => return Ok(OverwriteAnswer::AlwaysYes),
            "N" => return Ok(OverwriteAnswer::AlwaysNo),
            _ => continue,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile<S> {
    format: String,
    version: u32,
    source: String,
    chapter_id: u64,
    model: String,
    segments: S,
}

/// Persisted transcripts keyed by source file, chapter and model.
///
/// `Send + Sync`: writes and prompts are serialized by the policy lock.
pub struct TranscriptCache {
    dir: PathBuf,
    enabled: bool,
    model: String,
    policy: Mutex<OverwritePolicy>,
    prompter: Box<dyn Prompter>,
}

impl TranscriptCache {
    /// A cache that prompts on the console when asked to overwrite.
    pub fn new(opts: &CacheOpts, model: impl Into<String>) -> Self {
        Self::with_prompter(opts, model, ConsolePrompter)
    }

    pub fn with_prompter(
        opts: &CacheOpts,
        model: impl Into<String>,
        prompter: impl Prompter + 'static,
    ) -> Self {
        Self {
            dir: opts.dir.clone(),
            enabled: opts.enabled,
            model: model.into(),
            policy: Mutex::new(opts.overwrite),
            prompter: Box::new(prompter),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current policy; `Ask` may have been replaced by an "always" answer.
    pub fn policy(&self) -> Result<OverwritePolicy> {
        Ok(*self.lock_policy()?)
    }

    /// Where the entry for `source_file`/`chapter_id` lives.
    pub fn entry_path(&self, source_file: &Path, chapter_id: u64) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.subs",
            base_name(source_file),
            chapter_id,
            self.model
        ))
    }

    /// Load a cached transcript.
    ///
    /// `Ok(None)` when the cache is disabled or holds no entry. An entry that exists but
    /// doesn't decode into a valid transcript for this key is [`Error::CacheMalformed`].
    pub fn get(&self, source_file: &Path, chapter_id: u64) -> Result<Option<Vec<Segment>>> {
        if !self.enabled {
            return Ok(None);
        }

        let path = self.entry_path(source_file, chapter_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: CacheFile<Vec<Segment>> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::cache_malformed(&path, e.to_string()))?;

        if file.format != FORMAT_TAG {
            return Err(Error::cache_malformed(
                &path,
                format!("unexpected format tag '{}'", file.format),
            ));
        }
        if file.version != FORMAT_VERSION {
            return Err(Error::cache_malformed(
                &path,
                format!("unsupported version {}", file.version),
            ));
        }
        let source = base_name(source_file);
        if file.source != source || file.chapter_id != chapter_id || file.model != self.model {
            return Err(Error::cache_malformed(
                &path,
                format!(
                    "entry is for ({}, {}, {}), expected ({source}, {chapter_id}, {})",
                    file.source, file.chapter_id, file.model, self.model
                ),
            ));
        }
        for seg in &file.segments {
            seg.validate()
                .map_err(|e| Error::cache_malformed(&path, e.to_string()))?;
        }

        debug!(entry = %path.display(), segments = file.segments.len(), "cache hit");
        Ok(Some(file.segments))
    }

    /// Store a transcript and hand it back.
    ///
    /// New entries are always written. Existing ones follow the overwrite policy; a refused
    /// overwrite leaves the file alone and is not an error.
    pub fn put(
        &self,
        source_file: &Path,
        chapter_id: u64,
        segments: Vec<Segment>,
    ) -> Result<Vec<Segment>> {
        if !self.enabled {
            return Ok(segments);
        }

        let path = self.entry_path(source_file, chapter_id);
        let mut policy = self.lock_policy()?;

        if path.exists() {
            let overwrite = match *policy {
                OverwritePolicy::Always => true,
                OverwritePolicy::Never => false,
                OverwritePolicy::Ask => match self.prompter.confirm_overwrite(&path)? {
                    OverwriteAnswer::Yes => true,
                    OverwriteAnswer::No => false,
                    OverwriteAnswer::AlwaysYes => {
                        *policy = OverwritePolicy::Always;
                        true
                    }
                    OverwriteAnswer::AlwaysNo => {
                        *policy = OverwritePolicy::Never;
                        false
                    }
                },
            };

            if !overwrite {
                warn!(entry = %path.display(), "keeping existing cache entry");
                return Ok(segments);
            }
        }

        self.write_entry(&path, source_file, chapter_id, &segments)?;
        info!(entry = %path.display(), segments = segments.len(), "cached transcript");
        Ok(segments)
    }

    fn write_entry(
        &self,
        path: &Path,
        source_file: &Path,
        chapter_id: u64,
        segments: &[Segment],
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let file = CacheFile {
            format: FORMAT_TAG.to_owned(),
            version: FORMAT_VERSION,
            source: base_name(source_file),
            chapter_id,
            model: self.model.clone(),
            segments,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut w = BufWriter::new(&mut tmp);
            serde_json::to_writer(&mut w, &file)?;
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn lock_policy(&self) -> Result<std::sync::MutexGuard<'_, OverwritePolicy>> {
        self.policy
            .lock()
            .map_err(|_| Error::msg("cache policy mutex poisoned"))
    }
}
