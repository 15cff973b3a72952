//! Where to fetch the muxing tool for each platform.

use serde::{Deserialize, Serialize};

/// Supported operating system families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// Detects the current platform at compile time.
    ///
    /// Returns `None` if the platform is unsupported.
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Self::Macos)
        } else if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else {
            None
        }
    }

    /// File name of the installed tool on this platform.
    pub fn tool_file_name(&self) -> &'static str {
        match self {
            Self::Windows => "ffmpeg.exe",
            Self::Linux | Self::Macos => "ffmpeg",
        }
    }
}

/// Archive formats the bootstrapper can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    TarXz,
}

/// One downloadable build of the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArchive {
    pub url: String,
    pub format: ArchiveFormat,
    /// Path suffix identifying the binary inside the archive
    pub member_suffix: String,
}

impl ToolArchive {
    pub fn new(url: impl Into<String>, format: ArchiveFormat, member_suffix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format,
            member_suffix: member_suffix.into(),
        }
    }

    /// Static build published for `platform`.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self::new(
                "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip",
                ArchiveFormat::Zip,
                "bin/ffmpeg.exe",
            ),
            Platform::Macos => Self::new(
                "https://evermeet.cx/ffmpeg/getrelease/zip",
                ArchiveFormat::Zip,
                "ffmpeg",
            ),
            Platform::Linux => Self::new(
                "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz",
                ArchiveFormat::TarXz,
                "/ffmpeg",
            ),
        }
    }

    /// Build for the running platform, if there is one.
    pub fn current() -> Option<Self> {
        Platform::detect().map(Self::for_platform)
    }

    /// Whether `member` (an archive entry path) is the tool binary.
    pub fn matches_member(&self, member: &str) -> bool {
        let normalized = member.replace('\\', "/");
        if normalized.ends_with('/') {
            return false;
        }
        normalized == self.member_suffix.trim_start_matches('/')
            || normalized.ends_with(&format!("/{}", self.member_suffix.trim_start_matches('/')))
    }
}
