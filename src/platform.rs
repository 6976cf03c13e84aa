//! Host platform in the vocabulary registries use for manifest lists.

use std::env::consts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: String,
    pub architecture: String,
}

impl HostPlatform {
    /// Detects the platform this binary was built for.
    pub fn detect() -> Self {
        Self::new(consts::OS, oci_architecture(consts::ARCH))
    }

    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
        }
    }
}

/// Maps a Rust target architecture name to its OCI (GOARCH) spelling.
fn oci_architecture(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}
