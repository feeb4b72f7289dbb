use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::models::{KEY_PRIVACY_ACCEPTED, KEY_XP};
use crate::storage::{write_atomic, StoreError};

const HEADER: &str = "Questify config";

/// Scalar preferences in a `key=value` properties file.
///
/// Reads never fail: anything missing or unreadable falls back to the caller's default.
/// Every write rewrites the whole file.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.load()
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    pub fn set<T: Display>(&self, key: &str, value: T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut props = self.load();
        props.insert(key.to_string(), value.to_string());
        write_atomic(&self.path, render(&props).as_bytes())?;
        log::debug!("config saved path={} key={key}", self.path.display());
        Ok(())
    }

    /// Only a case-insensitive `true` reads as true; other present values read as false.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.load().get(key) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.set(key, value)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key, default)
    }

    pub fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.set(key, value)
    }

    pub fn privacy_accepted(&self) -> bool {
        self.get_bool(KEY_PRIVACY_ACCEPTED, false)
    }

    pub fn set_privacy_accepted(&self, accepted: bool) -> Result<(), StoreError> {
        self.set_bool(KEY_PRIVACY_ACCEPTED, accepted)
    }

    pub fn xp(&self) -> i64 {
        self.get_int(KEY_XP, 0)
    }

    pub fn set_xp(&self, xp: i64) -> Result<(), StoreError> {
        self.set_int(KEY_XP, xp)
    }

    fn load(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse(&contents),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "config unreadable, using defaults path={} err={err}",
                        self.path.display()
                    );
                }
                BTreeMap::new()
            }
        }
    }
}

fn parse(contents: &str) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let (key, value) = match line.find(['=', ':']) {
            Some(index) => (&line[..index], &line[index + 1..]),
            None => (line, ""),
        };
        props.insert(key.trim().to_string(), value.trim().to_string());
    }
    props
}

fn render(props: &BTreeMap<String, String>) -> String {
    let mut out = format!("#{HEADER}\n#{}\n", chrono::Local::now().to_rfc2822());
    for (key, value) in props {
        out.push_str(&format!("{key}={value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.properties"))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.get_bool("privacyAccepted", false));
        assert_eq!(store.get_int("xp", 0), 0);
        assert!(!store.privacy_accepted());
        assert_eq!(store.xp(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn set_then_get_round_trips_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set_privacy_accepted(true).unwrap();
        store.set_xp(30).unwrap();
        store.set_xp(-10).unwrap();

        assert!(store.privacy_accepted());
        assert_eq!(store.xp(), -10);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("#Questify config\n#"));
        assert!(raw.ends_with("privacyAccepted=true\nxp=-10\n"));
    }

    #[test]
    fn set_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("config.properties"));
        store.set_bool("privacyAccepted", true).unwrap();
        assert!(store.path().is_file());
    }

    #[test]
    fn unparsable_values_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "xp=lots\nprivacyAccepted=yes\n").unwrap();
        assert_eq!(store.get_int("xp", 7), 7);
        assert!(!store.get_bool("privacyAccepted", true));
        assert!(!store.get_bool("missing", false));
        assert!(store.get_bool("missing", true));
    }

    #[test]
    fn hand_edited_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "# comment\n! also a comment\n\n  xp = 42  \nprivacyAccepted:TRUE\nbare\n",
        )
        .unwrap();
        assert_eq!(store.xp(), 42);
        assert!(store.privacy_accepted());
        assert_eq!(store.get::<String>("bare", "x".to_string()), "");
    }

    #[test]
    fn unreadable_file_yields_defaults_but_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path()).unwrap();
        assert_eq!(store.get_int("xp", 5), 5);
        assert!(matches!(store.set_xp(1), Err(StoreError::Save { .. })));
    }
}
