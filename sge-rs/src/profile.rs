//! Named login profiles.
//!
//! A profile fixes the account, game and character to log in as, so the
//! command line only has to name it.

use crate::auth::LoginMode;
use crate::session::FrontEnd;

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub account: String,
    /// Game code, e.g. `DR`.
    pub game: String,
    /// Character code or name.
    pub character: String,
    pub mode: LoginMode,
    /// Overrides the `frontend` setting.
    pub front_end: Option<FrontEnd>,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        game: impl Into<String>,
        character: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            game: game.into(),
            character: character.into(),
            mode: LoginMode::Play,
            front_end: None,
        }
    }

    /// Serialize as an `/addprofile` line that loads back to the same profile.
    pub fn to_addprofile(&self) -> String {
        let mut parts = vec!["/addprofile".to_owned()];
        if self.mode == LoginMode::Storm {
            parts.push("-s".to_owned());
        }
        if let Some(fe) = self.front_end {
            parts.push(format!("-T{}", fe.name().to_ascii_lowercase()));
        }
        for field in [&self.name, &self.account, &self.game, &self.character] {
            if field.contains(char::is_whitespace) {
                parts.push(format!("\"{field}\""));
            } else {
                parts.push(field.clone());
            }
        }
        parts.join(" ")
    }
}

// ── ProfileStore ──────────────────────────────────────────────────────────────

/// Profiles in definition order; names are case-insensitive.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: Vec<Profile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile by name.  Returns `true` if it was new.
    pub fn upsert(&mut self, profile: Profile) -> bool {
        if let Some(slot) = self.profiles.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&profile.name)) {
            *slot = profile;
            false
        } else {
            self.profiles.push(profile);
            true
        }
    }

    pub fn find(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| !p.name.eq_ignore_ascii_case(name));
        self.profiles.len() < before
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_find_ignore_case() {
        let mut store = ProfileStore::new();
        assert!(store.upsert(Profile::new("main", "BOB", "DR", "Bobbin")));
        assert_eq!(store.find("MAIN").unwrap().character, "Bobbin");
    }

    #[test]
    fn upsert_replaces_existing() {
        let mut store = ProfileStore::new();
        store.upsert(Profile::new("main", "BOB", "DR", "Bobbin"));
        assert!(!store.upsert(Profile::new("Main", "BOB", "DRX", "Bobbin")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.find("main").unwrap().game, "DRX");
    }

    #[test]
    fn remove_profile() {
        let mut store = ProfileStore::new();
        store.upsert(Profile::new("keep", "A", "DR", "X"));
        store.upsert(Profile::new("gone", "A", "DR", "Y"));
        assert!(store.remove("gone"));
        assert!(!store.remove("gone"));
        assert_eq!(store.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["keep"]);
    }

    #[test]
    fn to_addprofile_minimal() {
        let p = Profile::new("main", "BOB", "DR", "Bobbin");
        assert_eq!(p.to_addprofile(), "/addprofile main BOB DR Bobbin");
    }

    #[test]
    fn to_addprofile_full() {
        let mut p = Profile::new("alt", "BOB", "GS3", "Two Words");
        p.mode = LoginMode::Storm;
        p.front_end = Some(FrontEnd::Wizard);
        assert_eq!(p.to_addprofile(), "/addprofile -s -Twizard alt BOB GS3 \"Two Words\"");
    }
}
