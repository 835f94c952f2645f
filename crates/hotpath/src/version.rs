//! Version information for hotpath.

/// hotpath version from Cargo.toml
pub const HOTPATH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build and platform details reported by `--version` and at startup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub hotpath: &'static str,
    pub os: &'static str,
    pub arch: &'static str,
    /// Number of cores this process may be pinned to (Linux only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<usize>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hotpath: HOTPATH_VERSION,
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            cores: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in the allowed core count from the calling thread's affinity mask.
    pub fn with_affinity(mut self) -> Self {
        let cores = crate::thread::allowed_cores();
        self.cores = (!cores.is_empty()).then_some(cores.len());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.hotpath, HOTPATH_VERSION);
        assert_eq!(info.os, std::env::consts::OS);
        assert!(info.cores.is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn affinity_counts_allowed_cores() {
        let info = VersionInfo::new().with_affinity();
        assert!(info.cores.is_some_and(|n| n >= 1));
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            hotpath: "0.1.0",
            os: "linux",
            arch: "x86_64",
            cores: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "hotpath": "0.1.0",
          "os": "linux",
          "arch": "x86_64"
        }
        "#);
    }

    #[test]
    fn version_info_serializes_full() {
        let info = VersionInfo {
            hotpath: "0.1.0",
            os: "linux",
            arch: "aarch64",
            cores: Some(8),
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "hotpath": "0.1.0",
          "os": "linux",
          "arch": "aarch64",
          "cores": 8
        }
        "#);
    }
}
