//! Node configuration – reads/writes `~/.meshcast/config.toml`.

use meshcast_middleware::TopicNames;
use meshcast_perception::ImageSize;
use meshcast_types::MapperError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Topic carrying spatial-mesh fragments.
    #[serde(default = "default_spatial_map_topic")]
    pub spatial_map_topic: String,

    /// Topic carrying 2D detection sets.
    #[serde(default = "default_det_topic")]
    pub det_topic: String,

    /// Topic the resolved 3D detection sets are published on.
    #[serde(default = "default_det_3d_topic")]
    pub det_3d_topic: String,

    /// Topic carrying headset poses.
    #[serde(default = "default_pose_topic")]
    pub pose_topic: String,

    /// Width of the detector's input image, in pixels.
    #[serde(default = "default_image_width")]
    pub image_width: u32,

    /// Height of the detector's input image, in pixels.
    #[serde(default = "default_image_height")]
    pub image_height: u32,

    /// WebSocket port of the rosbridge server.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Events buffered per bus lane before slow subscribers lag.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_spatial_map_topic() -> String {
    "SpatialMapData".to_string()
}
fn default_det_topic() -> String {
    "ObjectDetections".to_string()
}
fn default_det_3d_topic() -> String {
    "ObjectDetections3d".to_string()
}
fn default_pose_topic() -> String {
    "HeadsetPoseData".to_string()
}
fn default_image_width() -> u32 {
    1280
}
fn default_image_height() -> u32 {
    720
}
fn default_bridge_port() -> u16 {
    9090
}
fn default_bus_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spatial_map_topic: default_spatial_map_topic(),
            det_topic: default_det_topic(),
            det_3d_topic: default_det_3d_topic(),
            pose_topic: default_pose_topic(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            bridge_port: default_bridge_port(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Config {
    pub fn topics(&self) -> TopicNames {
        TopicNames {
            spatial_map: self.spatial_map_topic.clone(),
            detections: self.det_topic.clone(),
            detections_3d: self.det_3d_topic.clone(),
            pose: self.pose_topic.clone(),
        }
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(f64::from(self.image_width), f64::from(self.image_height))
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<(), MapperError> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(MapperError::Config(format!(
                "image size must be non-zero, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if self.bus_capacity == 0 {
            return Err(MapperError::Config("bus_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Return the path to `~/.meshcast/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".meshcast").join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist.  Environment overrides are applied in both cases.
pub fn load() -> Result<Config, MapperError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MapperError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        MapperError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| MapperError::Config(format!("Failed to parse config: {}", e)))?;
    Ok(Some(cfg))
}

/// Apply `MESHCAST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MESHCAST_SPATIAL_MAP_TOPIC` | `spatial_map_topic` |
/// | `MESHCAST_DET_TOPIC` | `det_topic` |
/// | `MESHCAST_DET_3D_TOPIC` | `det_3d_topic` |
/// | `MESHCAST_POSE_TOPIC` | `pose_topic` |
/// | `MESHCAST_IMAGE_WIDTH` | `image_width` |
/// | `MESHCAST_IMAGE_HEIGHT` | `image_height` |
/// | `MESHCAST_BRIDGE_PORT` | `bridge_port` |
///
/// Numeric values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    let var = |name: &str| std::env::var(name).ok();

    if let Some(v) = var("MESHCAST_SPATIAL_MAP_TOPIC") {
        cfg.spatial_map_topic = v;
    }
    if let Some(v) = var("MESHCAST_DET_TOPIC") {
        cfg.det_topic = v;
    }
    if let Some(v) = var("MESHCAST_DET_3D_TOPIC") {
        cfg.det_3d_topic = v;
    }
    if let Some(v) = var("MESHCAST_POSE_TOPIC") {
        cfg.pose_topic = v;
    }
    if let Some(width) = var("MESHCAST_IMAGE_WIDTH").and_then(|v| v.parse().ok()) {
        cfg.image_width = width;
    }
    if let Some(height) = var("MESHCAST_IMAGE_HEIGHT").and_then(|v| v.parse().ok()) {
        cfg.image_height = height;
    }
    if let Some(port) = var("MESHCAST_BRIDGE_PORT").and_then(|v| v.parse().ok()) {
        cfg.bridge_port = port;
    }
}

/// Save the config to disk, creating `~/.meshcast/` if necessary.
pub fn save(cfg: &Config) -> Result<(), MapperError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), MapperError> {
    let io_err = |what: &str, e: std::io::Error| MapperError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("Failed to create config directory", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("Failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| MapperError::Config(format!("Failed to serialize config: {}", e)))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("Failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| io_err(&format!("Failed to write config at {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_node_parameters() {
        let cfg = Config::default();
        assert_eq!(cfg.spatial_map_topic, "SpatialMapData");
        assert_eq!(cfg.det_topic, "ObjectDetections");
        assert_eq!(cfg.det_3d_topic, "ObjectDetections3d");
        assert_eq!(cfg.pose_topic, "HeadsetPoseData");
        assert_eq!(cfg.image_size(), ImageSize::new(1280.0, 720.0));
        assert_eq!(cfg.topics(), TopicNames::default());
        assert!(cfg.validate().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            det_topic: "/yolo/detections".to_string(),
            image_width: 1920,
            image_height: 1080,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bridge_port = 9191\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.bridge_port, 9191);
        assert_eq!(loaded.pose_topic, "HeadsetPoseData");
        assert_eq!(loaded.bus_capacity, 256);
    }

    #[test]
    fn unparsable_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "image_width = \"wide\"\n").expect("write");
        assert!(matches!(load_from(&path), Err(MapperError::Config(_))));
    }

    #[test]
    fn config_path_points_to_meshcast_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".meshcast"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn zero_image_size_is_rejected() {
        let cfg = Config {
            image_height: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(MapperError::Config(_))));
    }

    // All env-var assertions live in one test so parallel tests never race
    // on the same variables.
    #[test]
    fn apply_env_overrides_reads_meshcast_vars() {
        // SAFETY: no other test touches MESHCAST_* variables.
        unsafe {
            std::env::set_var("MESHCAST_DET_TOPIC", "/detector/out");
            std::env::set_var("MESHCAST_IMAGE_WIDTH", "640");
            std::env::set_var("MESHCAST_BRIDGE_PORT", "not-a-port");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.det_topic, "/detector/out");
        assert_eq!(cfg.image_width, 640);
        assert_eq!(cfg.bridge_port, 9090, "invalid port must be ignored");
        unsafe {
            std::env::remove_var("MESHCAST_DET_TOPIC");
            std::env::remove_var("MESHCAST_IMAGE_WIDTH");
            std::env::remove_var("MESHCAST_BRIDGE_PORT");
        }
    }
}
