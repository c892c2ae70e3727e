use std::path::{Path, PathBuf};

use crate::game_manager::storage::to_safe_folder_name;

pub struct Detection;

impl Detection {
    /// Candidate save directories for a newly added game, most specific first.
    ///
    /// Only well-known per-user locations and conventional folders under the
    /// install directory are considered; callers keep the ones that exist.
    pub fn candidate_save_locations(name: &str, install_path: &str) -> Vec<PathBuf> {
        let game_name = to_safe_folder_name(name);
        let mut candidates = Vec::new();

        if let Some(profile) = env_dir("USERPROFILE") {
            candidates.push(profile.join("Documents").join("My Games").join(&game_name));
        }
        for var in ["APPDATA", "LOCALAPPDATA", "PROGRAMDATA"] {
            if let Some(dir) = env_dir(var) {
                candidates.push(dir.join(&game_name));
            }
        }

        let install = install_path.trim();
        if !install.is_empty() {
            for sub in ["Save", "Saves", "Profiles"] {
                candidates.push(Path::new(install).join(sub));
            }
        }

        let mut seen = std::collections::HashSet::new();
        candidates.retain(|c| seen.insert(c.clone()));
        candidates
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_subfolders_are_candidates() {
        let candidates = Detection::candidate_save_locations("Portal", "/games/portal");
        assert!(candidates.contains(&PathBuf::from("/games/portal/Saves")));
        assert!(candidates.contains(&PathBuf::from("/games/portal/Profiles")));
    }

    #[test]
    fn test_blank_install_path_adds_nothing_from_install() {
        let candidates = Detection::candidate_save_locations("Portal", "  ");
        assert!(candidates.iter().all(|c| !c.ends_with("Saves")));
    }
}
