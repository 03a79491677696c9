//! Registry of recently used securities.
//!
//! A single JSON document (`registry.json` in the cache root) mapping codes to
//! display names and the time each code was last synced. The file is rewritten
//! atomically on every change; an unreadable file is treated as empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const REGISTRY_FILE: &str = "registry.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub code: String,
    pub name: Option<String>,
    pub last_used: NaiveDateTime,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    entries: Vec<RegistryEntry>,
}

pub struct SecurityRegistry {
    path: PathBuf,
}

impl SecurityRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Registry stored in the root of a cache directory.
    pub fn in_cache_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(REGISTRY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RegistryFile {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return RegistryFile::default();
        };
        match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring malformed registry");
                RegistryFile::default()
            }
        }
    }

    fn save(&self, file: &RegistryFile) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }

    /// Mark a code as used now. A `None` name keeps whatever name is stored.
    pub fn touch(&self, code: &str, name: Option<&str>) -> io::Result<()> {
        let mut file = self.read();
        let now = chrono::Local::now().naive_local();
        match file.entries.iter_mut().find(|e| e.code == code) {
            Some(entry) => {
                entry.last_used = now;
                if let Some(name) = name {
                    entry.name = Some(name.to_string());
                }
            }
            None => file.entries.push(RegistryEntry {
                code: code.to_string(),
                name: name.map(str::to_string),
                last_used: now,
            }),
        }
        self.save(&file)
    }

    /// All entries, most recently used first.
    pub fn list(&self) -> Vec<RegistryEntry> {
        let mut entries = self.read().entries;
        entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        entries
    }

    pub fn name_of(&self, code: &str) -> Option<String> {
        self.read()
            .entries
            .into_iter()
            .find(|e| e.code == code)
            .and_then(|e| e.name)
    }

    /// Remove a code. Returns whether it was present.
    pub fn forget(&self, code: &str) -> io::Result<bool> {
        let mut file = self.read();
        let before = file.entries.len();
        file.entries.retain(|e| e.code != code);
        if file.entries.len() == before {
            return Ok(false);
        }
        self.save(&file)?;
        Ok(true)
    }
}
