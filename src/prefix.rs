use crate::error::JobError;

/// Segment name that marks raw uploaded videos in an input prefix.
pub const RAW_MEDIA_SEGMENT: &str = "Raw-videos";

/// Segment name substituted into the output prefix in place of the
/// raw-media marker.
pub const PROCESSED_MEDIA_SEGMENT: &str = "Processed Frames";

/// Compute the output prefix for a given input prefix.
///
/// The input must follow the fixed 7-segment layout:
///
/// ```text
/// {base}/{base}/{date}/{client}/Raw-videos/{camera-angle}/{media-type}
///   [0]    [1]    [2]     [3]      [4]          [5]           [6]
/// ```
///
/// Segments `[0..=3]` and `[5..=6]` are preserved verbatim; the raw-media
/// marker at `[4]` is consumed and replaced by [`PROCESSED_MEDIA_SEGMENT`].
/// Keys always use forward slashes regardless of host OS. Pure function:
/// never touches the object store.
pub fn output_prefix(input: &str) -> Result<String, JobError> {
    let segments: Vec<&str> = input.trim_matches('/').split('/').collect();

    if segments.len() < 7 {
        return Err(JobError::InvalidPrefixFormat(input.to_string()));
    }

    let mut out: Vec<&str> = Vec::with_capacity(7);
    out.extend_from_slice(&segments[0..4]);
    out.push(PROCESSED_MEDIA_SEGMENT);
    out.push(segments[5]);
    out.push(segments[6]);

    Ok(out.join("/"))
}

/// Join a prefix and a relative name with exactly one `/` between them.
pub fn join_key(prefix: &str, name: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// File name without its final extension.
pub fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Stable identifier for a listing derived from its queried prefix.
pub fn folder_id(prefix: &str) -> String {
    prefix.trim_matches('/').replace('/', "-")
}
