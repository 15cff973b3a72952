// FormatSelector - unified format selection logic
//
// Converts raw formats from an InfoExtractor into StreamDescriptors and picks
// one according to a StreamSelection.
// Handles:
// - Pairing video-only streams with the best audio (AAC preferred) for muxing
// - Best quality detection (combined first, then height, then size)
// - Resolution lookup ("720p": exact height, else next one up)
// - Audio-only extraction

use super::errors::ExtractionError;
use super::extractors::EngineFormat;
use super::models::{StreamDescriptor, StreamSelection};

/// Container used when video and audio are muxed together
pub const MUXED_CONTAINER: &str = "mp4";

/// Lazy, single-pass sequence of descriptors in the engine's native order.
///
/// Video-only formats are skipped when the source offers no audio stream to
/// pair them with.
#[derive(Debug)]
pub struct StreamDescriptors {
    formats: std::vec::IntoIter<EngineFormat>,
    best_audio: Option<EngineFormat>,
}

impl Iterator for StreamDescriptors {
    type Item = StreamDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        for format in self.formats.by_ref() {
            if let Some(descriptor) = FormatSelector::describe(&format, self.best_audio.as_ref()) {
                return Some(descriptor);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.formats.size_hint().1)
    }
}

/// Format selector with smart quality detection
pub struct FormatSelector;

impl FormatSelector {
    /// Build descriptors from raw formats
    pub fn build_descriptors(formats: Vec<EngineFormat>) -> StreamDescriptors {
        let best_audio = {
            let audio: Vec<&EngineFormat> = formats.iter().filter(|f| f.audio_only).collect();
            Self::find_best_audio(&audio).cloned()
        };

        StreamDescriptors {
            formats: formats.into_iter(),
            best_audio,
        }
    }

    fn describe(format: &EngineFormat, best_audio: Option<&EngineFormat>) -> Option<StreamDescriptor> {
        if format.audio_only {
            return Some(StreamDescriptor {
                format_id: format.format_id.clone(),
                audio_format_id: None,
                container: Self::container_of(format, "m4a"),
                label: format
                    .abr
                    .map(|b| format!("{:.0}k", b))
                    .unwrap_or_else(|| "audio".to_string()),
                height: None,
                approx_size: format.effective_size(),
                requires_mux: false,
                audio_only: true,
            });
        }

        if format.is_combined() {
            return Some(StreamDescriptor {
                format_id: format.format_id.clone(),
                audio_format_id: None,
                container: Self::container_of(format, MUXED_CONTAINER),
                label: Self::height_label(format),
                height: format.height,
                approx_size: format.effective_size(),
                requires_mux: false,
                audio_only: false,
            });
        }

        if format.video_only {
            let audio = best_audio?;
            let approx_size = match (format.effective_size(), audio.effective_size()) {
                (Some(v), Some(a)) => Some(v + a),
                (Some(v), None) => Some(v),
                _ => None,
            };
            return Some(StreamDescriptor {
                format_id: format.format_id.clone(),
                audio_format_id: Some(audio.format_id.clone()),
                container: MUXED_CONTAINER.to_string(),
                label: Self::height_label(format),
                height: format.height,
                approx_size,
                requires_mux: true,
                audio_only: false,
            });
        }

        // Storyboards and other formats without codecs
        None
    }

    /// Pick one descriptor according to `selection`
    pub fn select(
        descriptors: impl IntoIterator<Item = StreamDescriptor>,
        selection: &StreamSelection,
    ) -> Result<StreamDescriptor, ExtractionError> {
        let no_match = || ExtractionError::NoMatchingStream {
            selection: selection.to_string(),
        };
        let mut descriptors = descriptors.into_iter();

        let picked = match selection {
            StreamSelection::Best => Self::find_best(descriptors.collect()),
            StreamSelection::FormatId(id) => descriptors.find(|d| &d.format_id == id),
            StreamSelection::Resolution(label) => {
                let target = Self::parse_height(label).ok_or_else(no_match)?;
                Self::find_by_height(descriptors.collect(), target)
            }
            StreamSelection::AudioOnly => descriptors
                .filter(|d| d.audio_only)
                .max_by_key(|d| (d.container == "m4a", d.approx_size.unwrap_or(0))),
            StreamSelection::Descriptor(wanted) => {
                // Still offered by the source; sizes may have been refreshed
                descriptors
                    .any(|d| d.format_id == wanted.format_id)
                    .then(|| wanted.as_ref().clone())
            }
        };

        picked.ok_or_else(no_match)
    }

    /// Distinct video heights, highest first (e.g. ["1080p", "720p"])
    pub fn available_resolutions(formats: &[EngineFormat]) -> Vec<String> {
        let mut heights: Vec<u32> = formats
            .iter()
            .filter(|f| !f.audio_only)
            .filter_map(|f| f.height)
            .filter(|h| *h > 0)
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.dedup();
        heights.into_iter().map(|h| format!("{}p", h)).collect()
    }

    /// Combined audio+video wins over muxed, then height, then size.
    /// Audio-only is the fallback when there is no video at all.
    fn find_best(descriptors: Vec<StreamDescriptor>) -> Option<StreamDescriptor> {
        let (audio, video): (Vec<_>, Vec<_>) = descriptors.into_iter().partition(|d| d.audio_only);

        video
            .into_iter()
            .max_by_key(|d| (d.is_combined(), d.height.unwrap_or(0), d.approx_size.unwrap_or(0)))
            .or_else(|| audio.into_iter().max_by_key(|d| d.approx_size.unwrap_or(0)))
    }

    /// Exact height with the largest size, else the smallest stream above it
    fn find_by_height(descriptors: Vec<StreamDescriptor>, target: u32) -> Option<StreamDescriptor> {
        let video: Vec<StreamDescriptor> = descriptors
            .into_iter()
            .filter(|d| !d.audio_only && d.height.is_some())
            .collect();

        let exact = video
            .iter()
            .filter(|d| d.height == Some(target))
            .max_by_key(|d| (d.approx_size.unwrap_or(0), d.is_combined()));
        if let Some(d) = exact {
            return Some(d.clone());
        }

        video
            .into_iter()
            .filter(|d| d.height.map_or(false, |h| h > target))
            .min_by_key(|d| (d.height.unwrap_or(u32::MAX), d.approx_size.unwrap_or(u64::MAX)))
    }

    /// Find best audio format (prefer AAC for compatibility)
    fn find_best_audio<'a>(formats: &[&'a EngineFormat]) -> Option<&'a EngineFormat> {
        let bitrate = |f: &&&EngineFormat| f.abr.map(|b| (b * 100.0) as u32).unwrap_or(0);

        let aac = formats.iter().filter(|f| f.is_aac()).max_by_key(bitrate).copied();

        if aac.is_some() {
            return aac;
        }

        // Fallback to highest bitrate audio
        formats.iter().max_by_key(bitrate).copied()
    }

    fn parse_height(label: &str) -> Option<u32> {
        label
            .trim()
            .trim_end_matches(|c| c == 'p' || c == 'P')
            .parse()
            .ok()
    }

    fn height_label(format: &EngineFormat) -> String {
        match format.height {
            Some(h) if h > 0 => format!("{}p", h),
            _ => format
                .resolution
                .clone()
                .unwrap_or_else(|| "video".to_string()),
        }
    }

    fn container_of(format: &EngineFormat, fallback: &str) -> String {
        if format.ext.is_empty() {
            fallback.to_string()
        } else {
            format.ext.clone()
        }
    }
}
