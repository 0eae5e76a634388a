//! Durable credit balance.
//!
//! The ledger itself is in-memory; this file lets the CLI carry the total
//! balance across processes. A `BalanceLock` holds an exclusive lock on the
//! file for as long as it lives, so a whole load-modify-save cycle is
//! serialized against other processes.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

/// On-disk balance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBalance {
    pub total: u64,
    pub updated_at: DateTime<Utc>,
}

/// JSON file holding the durable balance
pub struct BalanceStore {
    path: PathBuf,
}

/// Exclusive hold on the balance file; released on drop
pub struct BalanceLock {
    file: File,
    path: PathBuf,
}

impl BalanceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open balance file: {}", self.path.display()))
    }

    /// Take the exclusive lock, waiting for any other holder
    pub fn lock(&self) -> Result<BalanceLock> {
        let file = self.open()?;
        file.lock_exclusive()
            .context("Failed to acquire file lock on balance file")?;

        Ok(BalanceLock {
            file,
            path: self.path.clone(),
        })
    }

    /// Take the exclusive lock, or `None` if another holder has it
    pub fn try_lock(&self) -> Result<Option<BalanceLock>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(BalanceLock {
                file,
                path: self.path.clone(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).context("Failed to acquire file lock on balance file"),
        }
    }

    /// Load the stored balance, or `None` if nothing has been saved yet
    pub fn load(&self) -> Result<Option<StoredBalance>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)
            .with_context(|| format!("Failed to open balance file: {}", self.path.display()))?;
        file.lock_shared()
            .context("Failed to acquire shared lock on balance file")?;

        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        file.unlock().context("Failed to release balance file lock")?;
        read.with_context(|| format!("Failed to read balance file: {}", self.path.display()))?;

        parse(&content, &self.path)
    }

    /// Load the stored total, falling back to `default` when absent
    pub fn load_or(&self, default: u64) -> Result<u64> {
        Ok(self.load()?.map(|b| b.total).unwrap_or(default))
    }

    /// Persist `total` in a single locked write
    pub fn save(&self, total: u64) -> Result<StoredBalance> {
        self.lock()?.save(total)
    }
}

impl BalanceLock {
    /// Read the balance through the held lock
    pub fn load(&mut self) -> Result<Option<StoredBalance>> {
        let mut content = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut content))
            .with_context(|| format!("Failed to read balance file: {}", self.path.display()))?;

        parse(&content, &self.path)
    }

    pub fn load_or(&mut self, default: u64) -> Result<u64> {
        Ok(self.load()?.map(|b| b.total).unwrap_or(default))
    }

    /// Replace the stored balance with `total`
    pub fn save(&mut self, total: u64) -> Result<StoredBalance> {
        let stored = StoredBalance {
            total,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&stored).context("Failed to serialize balance")?;

        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(json.as_bytes()))
            .and_then(|_| self.file.sync_all())
            .with_context(|| format!("Failed to write balance file: {}", self.path.display()))?;

        Ok(stored)
    }
}

impl Drop for BalanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// An empty file is a balance that was never saved
fn parse(content: &str, path: &Path) -> Result<Option<StoredBalance>> {
    if content.trim().is_empty() {
        return Ok(None);
    }

    let stored = serde_json::from_str(content)
        .with_context(|| format!("Failed to parse balance file: {}", path.display()))?;
    Ok(Some(stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_default() {
        let temp = TempDir::new().unwrap();
        let store = BalanceStore::new(temp.path().join("credits.json"));

        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_or(10).unwrap(), 10);
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let store = BalanceStore::new(temp.path().join("nested").join("credits.json"));

        store.save(42).unwrap();
        assert_eq!(store.load_or(0).unwrap(), 42);

        // Shorter content fully replaces longer content
        store.save(7).unwrap();
        assert_eq!(store.load().unwrap().unwrap().total, 7);
    }

    #[test]
    fn test_fresh_lock_reads_as_unsaved() {
        let temp = TempDir::new().unwrap();
        let store = BalanceStore::new(temp.path().join("credits.json"));

        let mut lock = store.lock().unwrap();
        assert!(lock.load().unwrap().is_none());
        assert_eq!(lock.load_or(10).unwrap(), 10);

        lock.save(9).unwrap();
        lock.save(8).unwrap();
        assert_eq!(lock.load_or(0).unwrap(), 8);
    }
}
