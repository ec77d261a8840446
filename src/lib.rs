//! CellView Core - Hypothesis Generation for Cell Lineage Tracking
//!
//! This library is the hypothesis generation core of a multi-object
//! tracking system that reconstructs cell lineage trajectories from
//! microscopy time-lapse data. Given a set of previously linked tracklets,
//! it enumerates and scores every plausible event hypothesis explaining how
//! those tracklets stitch into complete lineages:
//!
//! 1. **Tracklets**: per-track motion prediction with dummy in-fill for
//!    lost frames (`cellview_tracklet`)
//! 2. **Spatial pruning**: a 4-D hash cube bounds the link-candidate
//!    search to near-linear work (`cellview_cube`)
//! 3. **Event scoring**: state-dependent log-probability models over seven
//!    event kinds (`cellview_hypothesis`)
//!
//! A downstream global optimizer consumes the scored hypotheses and
//! selects a conflict-free subset.

pub mod cellview_cube;
pub mod cellview_hypothesis;
pub mod cellview_motion;
pub mod cellview_objects;
pub mod cellview_tracklet;
pub mod error;

// Re-export key types for convenience
pub use cellview_cube::HypercubeBin;
pub use cellview_hypothesis::{
    count_apoptosis, safe_log, Hypothesis, HypothesisEngine, HypothesisKind, HypothesisParams,
};
pub use cellview_motion::{ConstantVelocityFilter, MotionModel, Prediction, StateEstimate};
pub use cellview_objects::{ObjectLabel, Observation, Volume, DIMS};
pub use cellview_tracklet::{Tracklet, MAX_LOST, MAX_TRACK_LEN};
pub use error::TrackError;
