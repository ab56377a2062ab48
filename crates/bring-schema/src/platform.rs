//! Platform detection from release asset names.
//! Vendors are inconsistent (macos/darwin/osx, arm64/aarch64, amd64/x86_64),
//! so everything is normalised to one spelling per platform.

use std::fmt;

/// Normalised operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    /// Linux-based systems.
    Linux,
    /// macOS, whatever the vendor calls it.
    Darwin,
    /// Microsoft Windows.
    Windows,
}

/// Normalised CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Intel/AMD 64-bit.
    X64,
    /// ARM 64-bit.
    Arm64,
    /// Intel 32-bit.
    X86,
}

impl Os {
    /// Variable value used in catalogs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// The OS this binary was compiled for, if it is one bring knows.
    pub fn current() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }
}

impl Arch {
    /// Variable value used in catalogs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
            Self::X86 => "x86",
        }
    }

    /// The architecture this binary was compiled for, if it is one bring knows.
    pub fn current() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Self::X64),
            "aarch64" => Some(Self::Arm64),
            "x86" => Some(Self::X86),
            _ => None,
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform indicators parsed from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetPlatform {
    /// Detected operating system, if any keyword was found.
    pub os: Option<Os>,
    /// Detected architecture, if any keyword was found.
    pub arch: Option<Arch>,
}

impl AssetPlatform {
    /// Parse platform keywords out of an asset file name.
    pub fn from_filename(filename: &str) -> Self {
        let f = filename.to_lowercase();
        let tokens: Vec<&str> = f
            .split(|c: char| !c.is_ascii_alphanumeric())
            .collect();
        let has = |needle: &str| tokens.iter().any(|t| *t == needle);

        let os = if f.contains("linux") {
            Some(Os::Linux)
        } else if f.contains("darwin") || f.contains("macos") || f.contains("osx") || f.contains("apple") || has("mac") {
            Some(Os::Darwin)
        } else if f.contains("windows") || has("win") || has("win64") || has("win32") || f.ends_with(".exe") {
            Some(Os::Windows)
        } else {
            None
        };

        let arch = if f.contains("arm64") || f.contains("aarch64") {
            Some(Arch::Arm64)
        } else if f.contains("x86_64") || f.contains("amd64") || has("x64") || has("win64") {
            Some(Arch::X64)
        } else if has("i386") || has("i686") || has("386") || has("x86") || has("win32") {
            Some(Arch::X86)
        } else {
            None
        };

        Self { os, arch }
    }
}
