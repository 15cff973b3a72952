// InfoExtractor module - video info extraction and stream fetch
//
// - CLI mode: uses the native `yt-dlp` binary
// - Diagnostics turn engine stderr into structured error kinds
// - The adapter adds URL validation, timeouts and retries on top

mod adapter;
mod cli;
mod diagnostics;
mod traits;

pub use adapter::{validate_url, ExtractionAdapter, ResolvedMedia};
pub use cli::CliInfoExtractor;
pub use diagnostics::{classify_engine_error, diagnose_error, BlockingReason};
pub use traits::{ByteStream, EngineFormat, ExtractorConfig, InfoExtractor, MediaInfo};
