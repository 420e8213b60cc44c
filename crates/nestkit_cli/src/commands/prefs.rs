//! Preferences command implementation.

use nestkit_core::Preferences;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Toggles to change; `None` keeps the stored value.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferenceChanges {
    /// Profile changes.
    pub profile: Option<bool>,
    /// Following changes.
    pub following: Option<bool>,
    /// Follower changes.
    pub followers: Option<bool>,
    /// Blocking changes.
    pub blocking: Option<bool>,
    /// Muting changes.
    pub muting: Option<bool>,
}

impl PreferenceChanges {
    fn apply_to(&self, preferences: &mut Preferences) {
        let fields = [
            (self.profile, &mut preferences.notify_profile_changes),
            (self.following, &mut preferences.notify_following_changes),
            (self.followers, &mut preferences.notify_follower_changes),
            (self.blocking, &mut preferences.notify_blocking_changes),
            (self.muting, &mut preferences.notify_muting_changes),
        ];
        for (change, field) in fields {
            if let Some(value) = change {
                *field = value;
            }
        }
    }
}

/// Preferences and where they came from.
#[derive(Debug, Serialize)]
pub struct PrefsReport {
    /// Blob path.
    pub path: String,
    /// False if no blob exists and defaults apply.
    pub stored: bool,
    /// Profile changes.
    pub profile: bool,
    /// Following changes.
    pub following: bool,
    /// Follower changes.
    pub followers: bool,
    /// Blocking changes.
    pub blocking: bool,
    /// Muting changes.
    pub muting: bool,
}

impl PrefsReport {
    fn new(path: &Path, stored: bool, preferences: &Preferences) -> Self {
        Self {
            path: path.display().to_string(),
            stored,
            profile: preferences.notify_profile_changes,
            following: preferences.notify_following_changes,
            followers: preferences.notify_follower_changes,
            blocking: preferences.notify_blocking_changes,
            muting: preferences.notify_muting_changes,
        }
    }
}

/// Loads preferences, falling back to defaults when no blob exists.
pub fn load(path: &Path) -> Result<(Preferences, bool), Box<dyn std::error::Error>> {
    match fs::read(path) {
        Ok(blob) => Ok((Preferences::decode(&blob)?, true)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no preferences blob; using defaults");
            Ok((Preferences::default(), false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes the blob via a temporary sibling and a rename.
fn store(path: &Path, preferences: &Preferences) -> Result<(), Box<dyn std::error::Error>> {
    let blob = preferences.encode()?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(&blob)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Runs `prefs show`.
pub fn show(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (preferences, stored) = load(path)?;
    print(&PrefsReport::new(path, stored, &preferences), format)
}

/// Runs `prefs set`.
pub fn set(
    path: &Path,
    changes: &PreferenceChanges,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut preferences, _) = load(path)?;
    changes.apply_to(&mut preferences);
    store(path, &preferences)?;
    info!(path = %path.display(), "preferences written");
    print(&PrefsReport::new(path, true, &preferences), format)
}

fn print(report: &PrefsReport, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(report)?),
        _ => {
            let source = if report.stored { "stored" } else { "defaults" };
            println!("Preferences: {} ({source})", report.path);
            let toggles = [
                ("profile", report.profile),
                ("following", report.following),
                ("followers", report.followers),
                ("blocking", report.blocking),
                ("muting", report.muting),
            ];
            for (name, enabled) in toggles {
                println!("  {name:<10} {}", if enabled { "on" } else { "off" });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_blob_means_defaults() {
        let dir = TempDir::new().unwrap();
        let (preferences, stored) = load(&dir.path().join("prefs")).unwrap();
        assert_eq!(preferences, Preferences::default());
        assert!(!stored);
    }

    #[test]
    fn set_changes_only_named_toggles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs");

        let changes = PreferenceChanges {
            muting: Some(false),
            ..PreferenceChanges::default()
        };
        set(&path, &changes, "json").unwrap();
        let changes = PreferenceChanges {
            profile: Some(false),
            ..PreferenceChanges::default()
        };
        set(&path, &changes, "text").unwrap();

        let (preferences, stored) = load(&path).unwrap();
        assert!(stored);
        assert!(!preferences.notify_muting_changes);
        assert!(!preferences.notify_profile_changes);
        assert!(preferences.notify_following_changes);
    }

    #[test]
    fn corrupt_blob_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs");
        fs::write(&path, b"\xff\xff").unwrap();
        assert!(load(&path).is_err());
    }
}
