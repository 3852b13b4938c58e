//! Session configuration.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ffi::{
    ClBitfield, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
};

/// Environment variable selecting the platform index.
pub const PLATFORM_ENV: &str = "CLMAT_PLATFORM";
/// Environment variable selecting the device type.
pub const DEVICE_ENV: &str = "CLMAT_DEVICE";
/// Environment variable with extra, whitespace-separated build options.
pub const BUILD_OPTIONS_ENV: &str = "CLMAT_BUILD_OPTIONS";
/// Environment variable overriding the OpenCL library path.
pub const LIBRARY_ENV: &str = "CLMAT_OPENCL_LIB";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid device type '{0}' (expected gpu, cpu, accelerator, default or all)")]
    InvalidDeviceType(String),

    #[error("invalid platform index '{0}'")]
    InvalidPlatform(String),
}

/// OpenCL device type requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    Default,
    All,
}

impl DeviceType {
    /// The `cl_device_type` bitfield for this device type.
    pub fn as_raw(self) -> ClBitfield {
        match self {
            DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
            DeviceType::Default => CL_DEVICE_TYPE_DEFAULT,
            DeviceType::All => CL_DEVICE_TYPE_ALL,
        }
    }
}

impl FromStr for DeviceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            "accelerator" => Ok(DeviceType::Accelerator),
            "default" => Ok(DeviceType::Default),
            "all" => Ok(DeviceType::All),
            _ => Err(ConfigError::InvalidDeviceType(s.to_string())),
        }
    }
}

/// Configuration for [`Session::open`](crate::Session::open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Index into the list returned by `clGetPlatformIDs`.
    pub platform_index: usize,

    /// Preferred device type.
    pub device_type: DeviceType,

    /// Retry with the CPU device type when no device of `device_type` exists.
    pub cpu_fallback: bool,

    /// Extra options appended after `-cl-kernel-arg-info` when building programs.
    pub build_options: Vec<String>,

    /// Explicit OpenCL library to load instead of the system ICD loader.
    pub library_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            platform_index: 0,
            device_type: DeviceType::Gpu,
            cpu_fallback: true,
            build_options: Vec::new(),
            library_path: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with the `CLMAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(p) = lookup(PLATFORM_ENV) {
            config.platform_index = p
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPlatform(p.clone()))?;
        }
        if let Some(d) = lookup(DEVICE_ENV) {
            config.device_type = d.parse()?;
        }
        if let Some(opts) = lookup(BUILD_OPTIONS_ENV) {
            config.build_options = opts.split_whitespace().map(str::to_string).collect();
        }
        if let Some(lib) = lookup(LIBRARY_ENV) {
            if !lib.trim().is_empty() {
                config.library_path = Some(PathBuf::from(lib));
            }
        }
        Ok(config)
    }

    /// Full option string passed to `clBuildProgram`.
    pub fn build_options_string(&self) -> String {
        let mut opts = String::from("-cl-kernel-arg-info");
        for o in &self.build_options {
            opts.push(' ');
            opts.push_str(o);
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = SessionConfig::default();
        assert_eq!(c.platform_index, 0);
        assert_eq!(c.device_type, DeviceType::Gpu);
        assert!(c.cpu_fallback);
        assert_eq!(c.build_options_string(), "-cl-kernel-arg-info");
    }

    #[test]
    fn test_env_overlay() {
        let c = SessionConfig::from_lookup(lookup(&[
            (PLATFORM_ENV, "1"),
            (DEVICE_ENV, "CPU"),
            (BUILD_OPTIONS_ENV, "-cl-fast-relaxed-math  -Werror"),
        ]))
        .unwrap();
        assert_eq!(c.platform_index, 1);
        assert_eq!(c.device_type, DeviceType::Cpu);
        assert_eq!(
            c.build_options_string(),
            "-cl-kernel-arg-info -cl-fast-relaxed-math -Werror"
        );
        assert!(c.library_path.is_none());
    }

    #[test]
    fn test_env_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[(DEVICE_ENV, "fpga")])),
            Err(ConfigError::InvalidDeviceType(_))
        ));
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&[(PLATFORM_ENV, "-1")])),
            Err(ConfigError::InvalidPlatform(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_partial() {
        let c: SessionConfig = serde_json::from_str(r#"{"device_type":"accelerator"}"#).unwrap();
        assert_eq!(c.device_type, DeviceType::Accelerator);
        assert!(c.cpu_fallback);
        assert_eq!(c.device_type.as_raw(), CL_DEVICE_TYPE_ACCELERATOR);
    }
}
