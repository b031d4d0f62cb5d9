//! Key classification and bucket usage accounting.
//!
//! A usage scan walks every key under a prefix exactly once and classifies
//! each one as a raw video, an extracted frame, or neither. Classification
//! is case-insensitive and purely lexical, so it can be unit tested without
//! an object store.

use serde::{Deserialize, Serialize};

/// Lowercased path marker for raw uploaded videos.
pub const RAW_VIDEOS_MARKER: &str = "/raw-videos/";

/// Lowercased path marker for extracted frame outputs.
pub const EXTRACTED_FRAMES_MARKER: &str = "/extracted_frames/";

/// Recognized video file extensions.
pub const VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".avi", ".mov"];

/// Recognized frame image extension.
pub const FRAME_EXTENSION: &str = ".jpg";

/// How a single object key counts toward usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// A raw video under the raw-media marker.
    Video,
    /// An extracted frame under the frames marker.
    Frame,
    /// Anything else; contributes nothing.
    Other,
}

/// Classify one object key. A key matches at most one class: the video
/// test wins over the frame test, and each test requires both its path
/// marker and its extension.
pub fn classify_key(key: &str) -> KeyClass {
    let key = key.to_ascii_lowercase();

    if key.contains(RAW_VIDEOS_MARKER) && VIDEO_EXTENSIONS.iter().any(|ext| key.ends_with(ext)) {
        KeyClass::Video
    } else if key.contains(EXTRACTED_FRAMES_MARKER) && key.ends_with(FRAME_EXTENSION) {
        KeyClass::Frame
    } else {
        KeyClass::Other
    }
}

/// Aggregate usage counters over one bucket/prefix scan.
///
/// Recomputed from scratch on every invocation; consistency is only as
/// strong as a single paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of raw videos found.
    pub total_videos: u64,
    /// Byte size of counted videos only.
    pub total_size_bytes: u64,
    /// Number of extracted frames found.
    pub total_detections: u64,
}

impl UsageStats {
    /// Fold one object into the counters.
    pub fn record(&mut self, key: &str, size_bytes: u64) {
        match classify_key(key) {
            KeyClass::Video => {
                self.total_videos += 1;
                self.total_size_bytes += size_bytes;
            }
            KeyClass::Frame => {
                self.total_detections += 1;
            }
            KeyClass::Other => {}
        }
    }

    /// Display form served to dashboards.
    pub fn report(&self) -> UsageReport {
        UsageReport {
            total_videos: self.total_videos,
            storage_usage: format_bytes(self.total_size_bytes),
            total_detections: self.total_detections,
        }
    }
}

/// [`UsageStats`] with the byte total rendered human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub total_videos: u64,
    pub storage_usage: String,
    pub total_detections: u64,
}

/// Render a byte count with base-1024 scaling and two decimal places.
pub fn format_bytes(byte_count: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = byte_count as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}
