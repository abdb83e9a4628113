/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables for the SQLite backend. Missing fields take their defaults, so a
/// partial JSON document is a valid configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct IndexedDBPrefs {
    pub journal_mode: String,
    pub synchronous: String,
    pub journal_size_limit: i64,
    pub mmap_size: i64,
    pub cache_size: i64,
    /// Where database files live. Callers fall back to a temporary
    /// directory when unset.
    pub base_dir: Option<PathBuf>,
}

impl Default for IndexedDBPrefs {
    fn default() -> Self {
        IndexedDBPrefs {
            journal_mode: "WAL".to_owned(),
            synchronous: "NORMAL".to_owned(),
            // 64 megabytes
            journal_size_limit: 67108864,
            mmap_size: 67108864,
            cache_size: 2000,
            base_dir: None,
        }
    }
}

impl IndexedDBPrefs {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Pragmas that only need to be set when a database file is created.
    pub fn init_pragmas(&self) -> Vec<String> {
        vec![
            format!("PRAGMA journal_mode = {};", self.journal_mode),
            "PRAGMA encoding = 'UTF-16';".to_owned(),
        ]
    }

    /// Pragmas that need to be run once per connection.
    pub fn connection_pragmas(&self) -> Vec<String> {
        vec![
            format!("PRAGMA synchronous = {};", self.synchronous),
            format!("PRAGMA journal_size_limit = {};", self.journal_size_limit),
            format!("PRAGMA mmap_size = {};", self.mmap_size),
            format!("PRAGMA cache_size = {};", self.cache_size),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::IndexedDBPrefs;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let prefs = IndexedDBPrefs::from_json(r#"{ "synchronous": "FULL", "cache_size": 10 }"#)
            .expect("valid prefs");
        assert_eq!(prefs.synchronous, "FULL");
        assert_eq!(prefs.cache_size, 10);
        assert_eq!(prefs.journal_mode, "WAL");
        assert_eq!(prefs.base_dir, None);
        assert_eq!(
            prefs.connection_pragmas()[0],
            "PRAGMA synchronous = FULL;".to_owned()
        );
    }

    #[test]
    fn test_default_pragmas() {
        let prefs = IndexedDBPrefs::default();
        assert_eq!(
            prefs.init_pragmas(),
            vec!["PRAGMA journal_mode = WAL;", "PRAGMA encoding = 'UTF-16';"]
        );
        assert_eq!(
            prefs.connection_pragmas(),
            vec![
                "PRAGMA synchronous = NORMAL;",
                "PRAGMA journal_size_limit = 67108864;",
                "PRAGMA mmap_size = 67108864;",
                "PRAGMA cache_size = 2000;",
            ]
        );
        assert!(IndexedDBPrefs::from_json("not json").is_err());
    }
}
