use anyhow::{anyhow, Result};
use camino::Utf8PathBuf;
use chrono::Utc;
use mirror_core::MirrorProfile;

use crate::persistence::FilePersistence;

pub struct ProfileManager {
    persistence: FilePersistence,
}

impl ProfileManager {
    pub fn new() -> Self {
        Self::with_persistence(FilePersistence::new())
    }

    pub fn with_persistence(persistence: FilePersistence) -> Self {
        Self { persistence }
    }

    pub fn persistence(&self) -> &FilePersistence {
        &self.persistence
    }

    pub fn list(&self) -> Result<Vec<MirrorProfile>> {
        self.persistence.load_profiles()
    }

    pub fn find(&self, name: &str) -> Result<MirrorProfile> {
        self.list()?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Profile '{}' not found", name))
    }

    pub fn add(
        &self,
        name: String,
        source_root: Utf8PathBuf,
        dest_root: Utf8PathBuf,
    ) -> Result<MirrorProfile> {
        let mut profiles = self.list()?;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(anyhow!("Profile name cannot be empty"));
        }
        if profiles.iter().any(|p| p.name.eq_ignore_ascii_case(&name)) {
            return Err(anyhow!("A profile named '{}' already exists", name));
        }

        let profile = MirrorProfile::new(name, source_root.as_str(), dest_root.as_str());
        profiles.push(profile.clone());
        self.persistence.save_profiles(&profiles)?;
        Ok(profile)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut profiles = self.list()?;
        let original_len = profiles.len();
        profiles.retain(|p| !p.name.eq_ignore_ascii_case(name));

        if profiles.len() == original_len {
            return Err(anyhow!("Profile '{}' not found", name));
        }

        self.persistence.save_profiles(&profiles)?;
        Ok(())
    }

    /// Record that the profile was just mirrored.
    pub fn touch(&self, name: &str) -> Result<()> {
        let mut profiles = self.list()?;
        let profile = profiles
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Profile '{}' not found", name))?;
        profile.last_mirrored = Some(Utc::now());

        self.persistence.save_profiles(&profiles)
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn handle_list(mgr: &ProfileManager) -> Result<()> {
    let profiles = mgr.list()?;

    if profiles.is_empty() {
        println!("No profiles found.");
        return Ok(());
    }

    println!(
        "{:<20} {:<36} {:<36} {:<20}",
        "NAME", "SOURCE", "DESTINATION", "LAST MIRRORED"
    );
    println!("{:-<20} {:-<36} {:-<36} {:-<20}", "", "", "", "");
    for p in profiles {
        let last = p
            .last_mirrored
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<36} {:<36} {:<20}",
            p.name, p.source_root, p.dest_root, last
        );
    }

    Ok(())
}

pub fn handle_add(
    mgr: &ProfileManager,
    name: String,
    source: Utf8PathBuf,
    dest: Utf8PathBuf,
) -> Result<()> {
    let p = mgr.add(name, source, dest)?;
    println!(
        "Profile '{}' created: {} -> {}",
        p.name, p.source_root, p.dest_root
    );
    Ok(())
}

pub fn handle_remove(mgr: &ProfileManager, name: String) -> Result<()> {
    mgr.remove(&name)?;
    println!("Profile '{}' removed.", name);
    Ok(())
}
