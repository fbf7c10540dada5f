//! Where talkbox keeps its settings file and, unless `storage.root` says
//! otherwise, its waveform files.  Both come from the `dirs` crate's per-user
//! locations, with the working directory as a last resort.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "talkbox";

#[derive(Debug, Clone)]
pub struct AppPaths {
    /// `<config>/talkbox/settings.toml`
    pub settings_file: PathBuf,
    /// `<local data>/talkbox/audio`
    pub audio_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let here = || PathBuf::from(".");
        Self::under(
            &dirs::config_dir().unwrap_or_else(here),
            &dirs::data_local_dir().unwrap_or_else(here),
        )
    }

    fn under(config_base: &Path, data_base: &Path) -> Self {
        Self {
            settings_file: config_base.join(APP_DIR).join("settings.toml"),
            audio_dir: data_base.join(APP_DIR).join("audio"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
