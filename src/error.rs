/// Error taxonomy for per-video failures.
///
/// Stream and selection errors are fatal to one video's run but never to the
/// batch; trajectory errors surface as an `"Error"` row in the distance
/// summary. Frames with no candidate are not errors at all.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("no frame could be decoded for region selection")]
    NoFrame,

    #[error("empty region selected")]
    EmptySelection,

    #[error("could not open video: {0}")]
    VideoUnreadable(String),

    #[error("trajectory log unreadable: {path}: {reason}")]
    Trajectory { path: String, reason: String },
}
