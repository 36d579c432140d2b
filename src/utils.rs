use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "TravelJournal";
const CONFIG_FILE_NAME: &str = "travel_journal.ini";

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

/// Per-user application data directory for the current platform.
pub fn get_app_data_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        home_dir()
            .join("Library")
            .join("Application Support")
            .join(APP_DIR_NAME)
    } else if cfg!(target_os = "windows") {
        match std::env::var("APPDATA") {
            Ok(appdata) => PathBuf::from(appdata).join(APP_DIR_NAME),
            Err(_) => PathBuf::from(".").join(APP_DIR_NAME),
        }
    } else {
        match std::env::var("XDG_DATA_HOME") {
            Ok(xdg_data_home) => PathBuf::from(xdg_data_home).join(APP_DIR_NAME),
            Err(_) => home_dir().join(".local").join("share").join(APP_DIR_NAME),
        }
    }
}

pub fn ensure_directory_exists(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn get_config_path() -> PathBuf {
    get_app_data_dir().join(CONFIG_FILE_NAME)
}

/// Lowercased extension of a path, if it has one.
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_lives_in_app_data_dir() {
        assert_eq!(get_config_path().parent(), Some(get_app_data_dir().as_path()));
        assert!(get_app_data_dir().ends_with(APP_DIR_NAME));
    }

    #[test]
    fn test_extension_lowercase() {
        assert_eq!(extension_lowercase(Path::new("a/IMG_0001.JPG")).as_deref(), Some("jpg"));
        assert_eq!(extension_lowercase(Path::new("README")), None);
    }
}
