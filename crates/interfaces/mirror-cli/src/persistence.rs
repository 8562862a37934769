use anyhow::{Context, Result};
use directories::ProjectDirs;
use mirror_core::MirrorProfile;
use mirror_pipeline::MirrorOptions;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// JSON-backed storage for profiles and engine settings.
pub struct FilePersistence {
    dir: Option<PathBuf>,
}

impl Default for FilePersistence {
    fn default() -> Self {
        Self::new()
    }
}

const QUALIFIER: &str = "dev";
const ORG: &str = "mirror";
const APP: &str = "mirror";

impl FilePersistence {
    /// Store under the platform config directory.
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// Store under `dir` instead of the platform config directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn config_dir(&self) -> Result<PathBuf> {
        let config_dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => ProjectDirs::from(QUALIFIER, ORG, APP)
                .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
                .config_dir()
                .to_path_buf(),
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).with_context(|| {
                format!("Failed to create config directory {}", config_dir.display())
            })?;
        }
        Ok(config_dir)
    }

    fn profiles_path(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("profiles.json"))
    }

    fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("settings.json"))
    }

    pub fn load_profiles(&self) -> Result<Vec<MirrorProfile>> {
        let path = self.profiles_path()?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context("Failed to read profiles")?;
        let profiles: Vec<MirrorProfile> =
            serde_json::from_str(&content).context("Failed to parse profiles")?;
        Ok(profiles)
    }

    pub fn save_profiles(&self, profiles: &[MirrorProfile]) -> Result<()> {
        let path = self.profiles_path()?;
        let json = serde_json::to_string_pretty(profiles)?;
        atomic_write(&path, json.as_bytes()).context("Failed to write profiles")?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<MirrorOptions> {
        let path = self.settings_path()?;
        if !path.exists() {
            return Ok(MirrorOptions::default());
        }
        let content = fs::read_to_string(&path).context("Failed to read settings")?;
        let settings: MirrorOptions =
            serde_json::from_str(&content).context("Failed to parse settings")?;
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &MirrorOptions) -> Result<()> {
        let path = self.settings_path()?;
        let json = serde_json::to_string_pretty(settings)?;
        atomic_write(&path, json.as_bytes()).context("Failed to write settings")?;
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {}", tmp_path.display()))?;
    drop(file);

    match fs::rename(&tmp_path, path) {
        Ok(()) => {}
        // Windows refuses to rename over an existing file.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            fs::remove_file(path).ok();
            fs::rename(&tmp_path, path)
                .with_context(|| format!("Failed to replace {}", path.display()))?;
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "Failed to rename {} to {}",
                    tmp_path.display(),
                    path.display()
                )
            });
        }
    }

    Ok(())
}
