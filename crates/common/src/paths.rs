use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "TAGBOX_CONFIG";

/// `$TAGBOX_CONFIG`, else `config.yaml` next to the executable.
pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Relative values are taken from the directory holding the config file.
pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value.trim());
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::resolve_path;

    #[test]
    fn relative_paths_follow_config_file() {
        let config = Path::new("/etc/tagbox/config.yaml");
        assert_eq!(
            resolve_path(config, "audio"),
            PathBuf::from("/etc/tagbox/audio")
        );
        assert_eq!(resolve_path(config, " /srv/audio "), PathBuf::from("/srv/audio"));
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "music"),
            PathBuf::from("./music")
        );
    }
}
