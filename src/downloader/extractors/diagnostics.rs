// Engine stderr -> structured ExtractionError
//
// Rules are checked in order; the first whose needle appears in the
// lowercased stderr decides the reason. Callers only ever see the kind.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::downloader::errors::ExtractionError;

/// What the engine reported when it refused a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingReason {
    UnsupportedUrl,
    Removed,
    Drm,
    MembersOnly,
    /// PO token / SABR
    StreamingProtection,
    AgeGate,
    Private,
    GeoBlocked,
    RateLimited,
    BotCheck,
    Forbidden,
    Unreachable,
    Unknown,
}

const RULES: &[(BlockingReason, &[&str])] = &[
    (BlockingReason::UnsupportedUrl, &["unsupported url", "no suitable extractor"]),
    (
        BlockingReason::Drm,
        &["drm", "widevine", "encrypted media", "requires purchase", "requires payment", "rental"],
    ),
    (
        BlockingReason::MembersOnly,
        &["members only", "members-only", "join this channel", "available to members"],
    ),
    (BlockingReason::StreamingProtection, &["sabr", "po token", "proof of origin"]),
    (
        BlockingReason::AgeGate,
        &["age-restricted", "confirm your age", "age_verification"],
    ),
    (
        BlockingReason::Private,
        &["private video", "video is private", "been granted access"],
    ),
    (
        BlockingReason::Removed,
        &[
            "video unavailable",
            "video is unavailable",
            "has been removed",
            "no longer available",
            "http error 404",
        ],
    ),
    (
        BlockingReason::GeoBlocked,
        &["in your country", "geo restrict", "geographic restriction"],
    ),
    (BlockingReason::RateLimited, &["429", "rate limit", "too many requests"]),
    (
        BlockingReason::BotCheck,
        &["not a bot", "captcha", "unusual traffic"],
    ),
    (BlockingReason::Forbidden, &["403", "forbidden"]),
    (
        BlockingReason::Unreachable,
        &[
            "timeout",
            "timed out",
            "connection refused",
            "connection reset",
            "network unreachable",
            "name resolution",
            "getaddrinfo",
        ],
    ),
];

impl BlockingReason {
    fn label(self) -> &'static str {
        match self {
            Self::UnsupportedUrl => "Unsupported URL",
            Self::Removed => "Media removed or unavailable",
            Self::Drm => "DRM-protected content",
            Self::MembersOnly => "Members-only content",
            Self::StreamingProtection => "Streaming protection active",
            Self::AgeGate => "Age-restricted content",
            Self::Private => "Private media",
            Self::GeoBlocked => "Not available in this region",
            Self::RateLimited => "Rate limited",
            Self::BotCheck => "Bot check triggered",
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::Unreachable => "Host unreachable or timed out",
            Self::Unknown => "Engine failed",
        }
    }

    /// Map onto the extraction error taxonomy, keeping `detail` for logs.
    pub fn into_error(self, detail: &str) -> ExtractionError {
        let message = if detail.is_empty() {
            self.label().to_string()
        } else {
            format!("{}: {}", self.label(), detail)
        };

        match self {
            Self::UnsupportedUrl | Self::Removed => ExtractionError::unsupported(message),
            Self::RateLimited | Self::Unreachable => ExtractionError::network(message),
            Self::Unknown => ExtractionError::EngineUnavailable { message },
            _ => ExtractionError::restricted(message),
        }
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reason behind an engine failure, `None` for empty output.
pub fn diagnose_error(stderr: &str) -> Option<BlockingReason> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lower = stderr.to_lowercase();
    let reason = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(reason, _)| *reason)
        .unwrap_or(BlockingReason::Unknown);
    Some(reason)
}

pub fn classify_engine_error(stderr: &str) -> ExtractionError {
    diagnose_error(stderr)
        .unwrap_or(BlockingReason::Unknown)
        .into_error(error_line(stderr))
}

/// First `ERROR:` line, else the first non-empty one
fn error_line(stderr: &str) -> &str {
    let mut lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.clone().next().unwrap_or("");
    lines
        .find(|l| l.get(..6).map_or(false, |p| p.eq_ignore_ascii_case("error:")))
        .unwrap_or(first)
}
