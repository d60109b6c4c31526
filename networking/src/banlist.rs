/// Operator bans, persisted as `banlist.json` in the data directory.
///
/// Unlike discouragement these are exact and survive restarts. A ban with
/// `ban_until == 0` never expires.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const BANLIST_FILE_NAME: &str = "banlist.json";
pub const BAN_ENTRY_VERSION: u32 = 1;

fn current_version() -> u32 {
    BAN_ENTRY_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub ban_until: i64,
}

impl BanEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        self.ban_until > 0 && now >= self.ban_until
    }
}

#[derive(Debug, Clone, Default)]
pub struct BanList {
    path: Option<PathBuf>,
    entries: BTreeMap<IpAddr, BanEntry>,
}

impl BanList {
    /// A list that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads `path` if it exists, dropping expired entries.
    pub fn load(path: impl Into<PathBuf>, now: i64) -> Result<Self> {
        let path = path.into();
        let mut list = Self {
            path: Some(path.clone()),
            entries: BTreeMap::new(),
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(list),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let entries: BTreeMap<IpAddr, BanEntry> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;

        let total = entries.len();
        list.entries = entries
            .into_iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .collect();
        info!(
            path = %path.display(),
            loaded = list.entries.len(),
            expired = total - list.entries.len(),
            "loaded ban list"
        );
        Ok(list)
    }

    /// Bans `addr` for `duration` seconds, or forever when `duration` is 0.
    pub fn ban(&mut self, addr: IpAddr, duration: i64, now: i64) {
        let ban_until = if duration > 0 { now + duration } else { 0 };
        self.entries.insert(
            addr,
            BanEntry {
                version: BAN_ENTRY_VERSION,
                create_time: now,
                ban_until,
            },
        );
        info!(%addr, ban_until, "address banned");
    }

    pub fn unban(&mut self, addr: &IpAddr) -> bool {
        self.entries.remove(addr).is_some()
    }

    pub fn is_banned(&self, addr: &IpAddr, now: i64) -> bool {
        self.entries
            .get(addr)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn sweep(&mut self, now: i64) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn entries(&self) -> &BTreeMap<IpAddr, BanEntry> {
        &self.entries
    }

    /// Writes the list atomically. No-op for in-memory lists.
    pub fn save(&mut self, now: i64) -> Result<()> {
        self.sweep(now);
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        write_file(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), bans = self.entries.len(), "ban list saved");
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
