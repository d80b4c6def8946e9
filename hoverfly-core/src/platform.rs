//! Mapping from the host OS and CPU architecture to a proxy binary name

use crate::{HoverflyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryIdentifier {
    os: &'static str,
    arch: &'static str,
    suffix: &'static str,
}

impl BinaryIdentifier {
    /// Identify the binary for the platform this process runs on.
    pub fn detect() -> Result<Self> {
        Self::for_target(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// `os` and `arch` use the vocabulary of `std::env::consts`.
    pub fn for_target(os: &str, arch: &str) -> Result<Self> {
        let unsupported = || HoverflyError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };

        let (os_name, suffix) = match os {
            "linux" => ("linux", ""),
            "macos" => ("OSX", ""),
            "windows" => ("windows", ".exe"),
            _ => return Err(unsupported()),
        };
        let arch_name = match arch {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "arm" => "arm",
            _ => return Err(unsupported()),
        };

        Ok(Self {
            os: os_name,
            arch: arch_name,
            suffix,
        })
    }

    /// File name of the binary, e.g. `hoverfly_linux_amd64`.
    pub fn binary_name(&self) -> String {
        format!("hoverfly_{}_{}{}", self.os, self.arch, self.suffix)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_names() {
        let cases = [
            ("linux", "x86_64", "hoverfly_linux_amd64"),
            ("linux", "aarch64", "hoverfly_linux_arm64"),
            ("macos", "aarch64", "hoverfly_OSX_arm64"),
            ("macos", "x86_64", "hoverfly_OSX_amd64"),
            ("windows", "x86", "hoverfly_windows_386.exe"),
            ("windows", "x86_64", "hoverfly_windows_amd64.exe"),
        ];
        for (os, arch, expected) in cases {
            assert_eq!(BinaryIdentifier::for_target(os, arch).unwrap().binary_name(), expected);
        }
    }

    #[test]
    fn test_unknown_os_is_unsupported() {
        match BinaryIdentifier::for_target("plan9", "x86_64") {
            Err(HoverflyError::UnsupportedPlatform { os, .. }) => assert_eq!(os, "plan9"),
            other => panic!("expected UnsupportedPlatform, got {:?}", other),
        }
        assert!(BinaryIdentifier::for_target("linux", "riscv64").is_err());
    }
}
