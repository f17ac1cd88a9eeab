//! Cloned-voice profile persistence
//!
//! Profiles live in a single flat JSON array, read once at startup and
//! rewritten in full on every mutation. Writes go through a temp file in the
//! same directory followed by a rename, so a crash mid-write never leaves a
//! corrupt store. The style instruction is an opaque string; it is passed to
//! the session verbatim and never interpreted here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const PROFILES_FILE_NAME: &str = "profiles.json";

/// A saved voice style built on one of the service's base voices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClonedVoiceProfile {
    /// Stable identifier, assigned on creation.
    pub id: String,
    /// Display name, unique only by convention.
    pub name: String,
    /// Base voice identity the style is applied to.
    pub base_voice: String,
    /// Opaque style directive; forwarded verbatim in the system instruction.
    pub style_instruction: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// In-memory view of the profile file plus the path it persists to.
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<ClonedVoiceProfile>,
}

impl ProfileStore {
    /// Default store location under the platform data directory.
    pub fn default_path() -> Result<PathBuf, String> {
        let dir = dirs::data_dir().ok_or_else(|| "could not determine data directory".to_string())?;
        Ok(dir.join("voiceloop").join(PROFILES_FILE_NAME))
    }

    /// Load the store, treating a missing file as empty.
    ///
    /// A file that exists but fails to parse is an error: silently starting
    /// empty would clobber every profile on the next mutation.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let profiles = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<Vec<ClonedVoiceProfile>>(&contents)
                .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(format!("Failed to read {:?}: {}", path, e)),
        };
        log::info!("Loaded {} voice profiles from {:?}", profiles.len(), path);
        Ok(Self { path, profiles })
    }

    pub fn all(&self) -> &[ClonedVoiceProfile] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&ClonedVoiceProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Create a profile and persist the store. Returns the new profile's id.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        base_voice: impl Into<String>,
        style_instruction: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<String, String> {
        let profile = ClonedVoiceProfile {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            base_voice: base_voice.into(),
            style_instruction: style_instruction.into(),
            tags,
        };
        let id = profile.id.clone();
        self.profiles.push(profile);
        self.save()?;
        Ok(id)
    }

    pub fn rename(&mut self, id: &str, new_name: impl Into<String>) -> Result<(), String> {
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| format!("No profile with id {}", id))?;
        profile.name = new_name.into();
        self.save()
    }

    pub fn delete(&mut self, id: &str) -> Result<(), String> {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != id);
        if self.profiles.len() == before {
            return Err(format!("No profile with id {}", id));
        }
        self.save()
    }

    /// Rewrite the whole store atomically: temp file in the same directory,
    /// then rename over the destination.
    fn save(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create profile directory {:?}: {}", parent, e))?;
        }

        let contents = serde_json::to_string_pretty(&self.profiles)
            .map_err(|e| format!("Serialize profiles: {}", e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)
            .map_err(|e| format!("Write temp profiles {:?}: {}", tmp_path, e))?;

        // On Unix, rename atomically replaces the destination. On Windows it
        // fails if the destination exists, so remove it first.
        if cfg!(windows) && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!(
                        "Remove existing profile file {:?}: {}",
                        self.path, e
                    ));
                }
            }
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("Rename {:?} to {:?}: {}", tmp_path, self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> ProfileStore {
        ProfileStore::load(dir.join(PROFILES_FILE_NAME)).expect("load")
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_create_persists_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(dir.path());

        let id = store
            .create(
                "Narrator",
                "aria",
                "Speak like a documentary narrator.",
                vec!["demo".to_string()],
            )
            .expect("create");

        let reloaded = ProfileStore::load(store.path()).expect("reload");
        let profile = reloaded.get(&id).expect("profile");
        assert_eq!(profile.name, "Narrator");
        assert_eq!(profile.base_voice, "aria");
        assert_eq!(profile.tags, vec!["demo".to_string()]);
    }

    #[test]
    fn test_rename_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(dir.path());

        let id = store
            .create("Old name", "aria", "style", vec![])
            .expect("create");
        store.rename(&id, "New name").expect("rename");
        assert_eq!(store.get(&id).unwrap().name, "New name");

        store.delete(&id).expect("delete");
        assert!(store.get(&id).is_none());

        let reloaded = ProfileStore::load(store.path()).expect("reload");
        assert!(reloaded.all().is_empty());
    }

    #[test]
    fn test_mutations_on_unknown_id_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(dir.path());

        assert!(store.rename("nope", "x").is_err());
        assert!(store.delete("nope").is_err());
    }

    #[test]
    fn test_corrupt_file_is_not_clobbered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(PROFILES_FILE_NAME);
        std::fs::write(&path, "not json").expect("write");

        assert!(ProfileStore::load(&path).is_err());
        // The broken file is still there for the user to inspect
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(dir.path());
        store.create("A", "aria", "s", vec![]).expect("create");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
