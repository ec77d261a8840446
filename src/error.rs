//! Error taxonomy shared across the lineage tracking pipeline.

use thiserror::Error;

/// Errors surfaced by the tracking core.
///
/// The taxonomy is shared with the upstream frame-to-frame association
/// stage; `EmptyQueue`, `NoTracks` and `TrackEmpty` name conditions raised
/// there. Within this crate, calling [`create`] before any track has been
/// added yields an empty hypothesis list rather than `NoTracks`.
///
/// [`create`]: crate::cellview_hypothesis::HypothesisEngine::create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackError {
    /// An operation required non-empty input.
    #[error("operation requires a non-empty queue")]
    EmptyQueue,

    /// No tracks are available for processing.
    #[error("no tracks have been added")]
    NoTracks,

    /// A tracklet with zero observations was encountered.
    #[error("tracklet contains no observations")]
    TrackEmpty,

    /// `max_lost` exceeds the supported range.
    #[error("max_lost is out of range")]
    MaxLostOutOfRange,

    /// A rate parameter fell outside the open interval (0, 1), or a
    /// threshold was not positive.
    #[error("accuracy parameter is out of range")]
    AccuracyOutOfRange,

    /// The default assignment probability fell outside (0, 1).
    #[error("assignment probability is out of range")]
    ProbNotAssignOutOfRange,

    /// A hypothesis kind outside the defined set was requested.
    #[error("hypothesis type is not defined")]
    NotDefined,
}
