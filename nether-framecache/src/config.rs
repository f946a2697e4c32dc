//! Cache configuration (config.toml)
//!
//! Byte budgets, descriptor limits and diagnostic toggles. Everything here is
//! fixed at init time: the arenas never grow.

use std::path::{Path, PathBuf};

use nether_framecache_shared::GeoHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::UPDATE_ALIGNMENT;

const MIB: u64 = 1024 * 1024;

/// Frame cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FrameCacheConfig {
    /// Geometry arena budgets
    #[serde(default)]
    pub geometry: GeometryConfig,
    /// Descriptor pool and uniform ring limits
    #[serde(default)]
    pub descriptors: DescriptorConfig,
    /// Diagnostic logging toggles
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Geometry arena budgets, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Transient sets (default: 2)
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    /// Per-frame vertex budget (default: 31 MiB)
    #[serde(default = "default_geometry_bytes")]
    pub vertex_bytes_per_frame: u64,
    /// Per-frame index budget (default: 31 MiB)
    #[serde(default = "default_geometry_bytes")]
    pub index_bytes_per_frame: u64,
    /// Per-frame joint budget (default: 256 KiB)
    #[serde(default = "default_joint_bytes")]
    pub joint_bytes_per_frame: u64,
    /// Static vertex budget (default: 31 MiB)
    #[serde(default = "default_geometry_bytes")]
    pub static_vertex_bytes: u64,
    /// Static index budget (default: 31 MiB)
    #[serde(default = "default_geometry_bytes")]
    pub static_index_bytes: u64,
    /// Vertex allocation alignment (default: 32)
    #[serde(default = "default_vertex_alignment")]
    pub vertex_alignment: u64,
    /// Index allocation alignment (default: 16)
    #[serde(default = "default_index_alignment")]
    pub index_alignment: u64,
}

/// Descriptor pool and uniform ring limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Descriptor sets per frame (default: 16384)
    #[serde(default = "default_max_sets")]
    pub max_sets: u32,
    /// Uniform buffer descriptors per frame pool (default: 8192)
    #[serde(default = "default_max_uniform_buffers")]
    pub max_uniform_buffers: u32,
    /// Image sampler descriptors per frame pool (default: 12384)
    #[serde(default = "default_max_image_samplers")]
    pub max_image_samplers: u32,
    /// Writes per descriptor set (default: 32)
    #[serde(default = "default_max_set_writes")]
    pub max_set_writes: u32,
    /// vec4 uniforms per set, sizes the parameter ring (default: 48)
    #[serde(default = "default_max_set_uniforms")]
    pub max_set_uniforms: u32,
    /// Texture units addressable by `set_texture` (default: 16)
    #[serde(default = "default_max_image_parms")]
    pub max_image_parms: u32,
}

/// Diagnostic toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiagnosticsConfig {
    /// Log per-frame cache usage on every backend advance
    #[serde(default)]
    pub show_vertex_cache: bool,
    /// Log every native buffer allocation and free
    #[serde(default)]
    pub show_buffers: bool,
    /// Log per-program pipeline counts at shutdown
    #[serde(default)]
    pub print_pipeline_counts: bool,
}

fn default_frames_in_flight() -> usize {
    2
}
fn default_geometry_bytes() -> u64 {
    31 * MIB
}
fn default_joint_bytes() -> u64 {
    256 * 1024
}
fn default_vertex_alignment() -> u64 {
    32
}
fn default_index_alignment() -> u64 {
    16
}

fn default_max_sets() -> u32 {
    16384
}
fn default_max_uniform_buffers() -> u32 {
    8192
}
fn default_max_image_samplers() -> u32 {
    12384
}
fn default_max_set_writes() -> u32 {
    32
}
fn default_max_set_uniforms() -> u32 {
    48
}
fn default_max_image_parms() -> u32 {
    16
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
            vertex_bytes_per_frame: default_geometry_bytes(),
            index_bytes_per_frame: default_geometry_bytes(),
            joint_bytes_per_frame: default_joint_bytes(),
            static_vertex_bytes: default_geometry_bytes(),
            static_index_bytes: default_geometry_bytes(),
            vertex_alignment: default_vertex_alignment(),
            index_alignment: default_index_alignment(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            max_sets: default_max_sets(),
            max_uniform_buffers: default_max_uniform_buffers(),
            max_image_samplers: default_max_image_samplers(),
            max_set_writes: default_max_set_writes(),
            max_set_uniforms: default_max_set_uniforms(),
            max_image_parms: default_max_image_parms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Frames in flight are tagged into handles; keep the window small.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

impl FrameCacheConfig {
    /// Read and validate a config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Check budgets fit the handle layout and alignments are powers of two
    /// no smaller than the buffer update granularity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.geometry;
        if g.frames_in_flight == 0 || g.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "geometry.frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                g.frames_in_flight
            )));
        }
        for (name, align) in [
            ("geometry.vertex_alignment", g.vertex_alignment),
            ("geometry.index_alignment", g.index_alignment),
        ] {
            if !align.is_power_of_two() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a power of two, got {align}"
                )));
            }
            // Eager uploads land at allocation offsets.
            if align < UPDATE_ALIGNMENT {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at least {UPDATE_ALIGNMENT}, got {align}"
                )));
            }
        }

        // Offsets must stay addressable by the handle's offset field.
        let max_budget = GeoHandle::MAX_OFFSET + 1;
        for (name, bytes) in [
            ("geometry.vertex_bytes_per_frame", g.vertex_bytes_per_frame),
            ("geometry.index_bytes_per_frame", g.index_bytes_per_frame),
            ("geometry.joint_bytes_per_frame", g.joint_bytes_per_frame),
            ("geometry.static_vertex_bytes", g.static_vertex_bytes),
            ("geometry.static_index_bytes", g.static_index_bytes),
        ] {
            if bytes > max_budget {
                return Err(ConfigError::Invalid(format!(
                    "{name} = {bytes} exceeds the addressable {max_budget} bytes"
                )));
            }
        }

        let d = &self.descriptors;
        if d.max_sets == 0 || d.max_set_uniforms == 0 {
            return Err(ConfigError::Invalid(
                "descriptors.max_sets and descriptors.max_set_uniforms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Bytes of one frame's uniform parameter ring.
    pub fn parm_ring_bytes(&self) -> u64 {
        u64::from(self.descriptors.max_sets) * u64::from(self.descriptors.max_set_uniforms) * 16
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.nethercore", "", "NetherFrameCache")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads `config.toml` from the config directory.
///
/// Returns defaults if the file doesn't exist, cannot be parsed or fails
/// validation.
pub fn load() -> FrameCacheConfig {
    config_dir()
        .and_then(|dir| FrameCacheConfig::load_from(&dir.join("config.toml")).ok())
        .unwrap_or_default()
}

/// Saves `config.toml` to the config directory.
pub fn save(config: &FrameCacheConfig) -> Result<(), ConfigError> {
    match config_dir() {
        Some(dir) => config.save_to(&dir.join("config.toml")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================================
    // Default value tests
    // =============================================================

    #[test]
    fn test_config_default() {
        let config = FrameCacheConfig::default();
        assert_eq!(config.geometry.frames_in_flight, 2);
        assert_eq!(config.geometry.vertex_bytes_per_frame, 31 * MIB);
        assert_eq!(config.geometry.joint_bytes_per_frame, 256 * 1024);
        assert_eq!(config.geometry.vertex_alignment, 32);
        assert_eq!(config.geometry.index_alignment, 16);
        assert_eq!(config.descriptors.max_sets, 16384);
        assert_eq!(config.descriptors.max_image_samplers, 12384);
        assert!(!config.diagnostics.show_vertex_cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parm_ring_bytes() {
        let config = FrameCacheConfig::default();
        assert_eq!(config.parm_ring_bytes(), 16384 * 48 * 16);
    }

    // =============================================================
    // TOML serialization tests
    // =============================================================

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = FrameCacheConfig::default();
        config.geometry.frames_in_flight = 3;
        config.geometry.vertex_bytes_per_frame = 1 << 20;
        config.diagnostics.show_buffers = true;

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: FrameCacheConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: FrameCacheConfig = toml::from_str("").unwrap();
        assert_eq!(config, FrameCacheConfig::default());
    }

    #[test]
    fn test_config_deserialize_partial_geometry() {
        let toml_str = r#"
[geometry]
vertex_bytes_per_frame = 1048576

[diagnostics]
show_vertex_cache = true
"#;
        let config: FrameCacheConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.geometry.vertex_bytes_per_frame, 1 << 20);
        assert_eq!(config.geometry.index_bytes_per_frame, 31 * MIB); // default
        assert!(config.diagnostics.show_vertex_cache);
        assert_eq!(config.descriptors, DescriptorConfig::default());
    }

    // =============================================================
    // Validation tests
    // =============================================================

    #[test]
    fn test_validate_rejects_bad_alignment() {
        let mut config = FrameCacheConfig::default();
        config.geometry.vertex_alignment = 24;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_alignment_below_16() {
        let mut config = FrameCacheConfig::default();
        config.geometry.index_alignment = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("geometry.index_alignment"));

        config.geometry.index_alignment = 16;
        config.geometry.vertex_alignment = 8;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("geometry.vertex_alignment"));
    }

    #[test]
    fn test_validate_rejects_frames_in_flight() {
        let mut config = FrameCacheConfig::default();
        config.geometry.frames_in_flight = 0;
        assert!(config.validate().is_err());
        config.geometry.frames_in_flight = MAX_FRAMES_IN_FLIGHT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unaddressable_budget() {
        let mut config = FrameCacheConfig::default();
        config.geometry.static_vertex_bytes = 64 * MIB;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("geometry.static_vertex_bytes"));
    }

    // =============================================================
    // File tests
    // =============================================================

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = FrameCacheConfig::default();
        config.descriptors.max_sets = 128;
        config.save_to(&path).unwrap();

        let loaded = FrameCacheConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FrameCacheConfig::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[geometry]\nframes_in_flight = 0\n").unwrap();
        assert!(matches!(
            FrameCacheConfig::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
