//! Ledger of already-accepted alert fingerprints.
//!
//! The [`Ledger`] is an in-memory ordered set. [`LedgerStore`] persists it as
//! a plain text file, one fingerprint per line, rewritten whole after every
//! poll cycle.
//!
//! # Atomic Writes
//!
//! Saves go through a write-to-temp-then-rename sequence:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<path>`
//! 4. fsync the parent directory
//!
//! A reader sees either the previous ledger or the new one, never a prefix.

use crate::fingerprint::Fingerprint;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while persisting the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Set of fingerprints seen so far, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    seen: HashSet<Fingerprint>,
    order: Vec<Fingerprint>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Record a fingerprint. Returns `false` if it was already present.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint.clone());
        self.order.push(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fingerprints in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.order.iter()
    }

    /// Render the ledger in its on-disk form.
    fn render(&self) -> String {
        let mut out = String::with_capacity(self.order.len() * 65);
        for fingerprint in &self.order {
            out.push_str(fingerprint.as_str());
            out.push('\n');
        }
        out
    }
}

impl FromIterator<Fingerprint> for Ledger {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        let mut ledger = Ledger::new();
        for fingerprint in iter {
            ledger.insert(fingerprint);
        }
        ledger
    }
}

/// Flat-file persistence for a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger from disk.
    ///
    /// Never fails: a missing or unreadable file yields an empty ledger so
    /// startup always succeeds. Blank and malformed lines are skipped.
    pub fn load(&self) -> Ledger {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No ledger file yet, starting empty");
                return Ledger::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read ledger, starting empty"
                );
                return Ledger::new();
            }
        };

        let mut skipped = 0usize;
        let ledger: Ledger = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = Fingerprint::parse(line);
                if parsed.is_none() {
                    skipped += 1;
                }
                parsed
            })
            .collect();

        if skipped > 0 {
            warn!(
                path = %self.path.display(),
                skipped = skipped,
                "Ignored malformed ledger lines"
            );
        }

        info!(
            path = %self.path.display(),
            entries = ledger.len(),
            "Ledger loaded"
        );

        ledger
    }

    /// Overwrite the ledger file atomically.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        self.write_atomic(ledger.render().as_bytes())
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            entries = ledger.len(),
            "Ledger saved"
        );
        Ok(())
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Some(parent),
            _ => None,
        };
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        // Make the rename itself durable
        #[cfg(unix)]
        File::open(parent.unwrap_or_else(|| Path::new(".")))?.sync_all()?;

        Ok(())
    }
}
