//! Core data model - observations, biological states, and the field of view.
//!
//! An `Observation` is a single spatial localisation of one cell at one
//! frame, carrying the biological state label assigned by the upstream
//! classifier. Observations are immutable once constructed; the only
//! sanctioned derivation is the dummy copy used to in-fill lost frames.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Number of spatial dimensions used throughout the core.
pub const DIMS: usize = 3;

/// Biological state of a cell at the time of an observation.
///
/// Discriminants are stable wire values shared with the upstream
/// classifier and the downstream optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectLabel {
    Interphase = 0,
    Prometaphase = 1,
    Metaphase = 2,
    Anaphase = 3,
    Apoptosis = 4,
    Null = 5,
}

/// A single detection at one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Identifier assigned by the segmentation stage. Dummy observations
    /// carry id 0.
    pub id: u32,

    /// Frame number.
    pub t: i64,

    /// Spatial position in volume coordinates.
    pub position: Vector3<f64>,

    /// Biological state label.
    pub label: ObjectLabel,

    /// True for synthetic in-fill observations inserted while the cell
    /// was lost; trimmed before the track is finalized.
    pub dummy: bool,
}

impl Observation {
    /// Create a real observation.
    pub fn new(id: u32, t: i64, position: Vector3<f64>, label: ObjectLabel) -> Self {
        Self {
            id,
            t,
            position,
            label,
            dummy: false,
        }
    }

    /// Derive a dummy observation from this one, placed at the predicted
    /// position one frame later.
    ///
    /// The label is carried over; id 0 and the dummy flag mark it for
    /// later trimming.
    pub fn as_dummy(&self, position: Vector3<f64>) -> Self {
        Self {
            id: 0,
            t: self.t + 1,
            position,
            label: self.label,
            dummy: true,
        }
    }
}

/// Axis-aligned bounding box of the imaging volume.
///
/// A dimension with `min == max` is degenerate (e.g. a 2-D dataset with a
/// flat z axis) and is skipped in border-distance computations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub min_xyz: Vector3<f64>,
    pub max_xyz: Vector3<f64>,
}

impl Volume {
    /// Create a volume. Requires `min <= max` componentwise.
    pub fn new(min_xyz: Vector3<f64>, max_xyz: Vector3<f64>) -> Self {
        debug_assert!(
            (0..DIMS).all(|d| min_xyz[d] <= max_xyz[d]),
            "volume min must not exceed max"
        );
        Self { min_xyz, max_xyz }
    }
}

impl Default for Volume {
    /// The unbounded volume: every observation is infinitely far from the
    /// border, so no border-gated hypotheses are emitted.
    fn default() -> Self {
        Self {
            min_xyz: Vector3::repeat(f64::NEG_INFINITY),
            max_xyz: Vector3::repeat(f64::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_derivation() {
        let obs = Observation::new(42, 7, Vector3::new(1.0, 2.0, 3.0), ObjectLabel::Metaphase);
        let dummy = obs.as_dummy(Vector3::new(4.0, 5.0, 6.0));

        assert_eq!(dummy.id, 0);
        assert_eq!(dummy.t, 8);
        assert!(dummy.dummy);
        assert_eq!(dummy.label, ObjectLabel::Metaphase);
        assert_eq!(dummy.position, Vector3::new(4.0, 5.0, 6.0));

        // The source observation is untouched.
        assert_eq!(obs.id, 42);
        assert!(!obs.dummy);
    }

    #[test]
    fn test_dummy_of_dummy_steps_time() {
        let obs = Observation::new(1, 10, Vector3::zeros(), ObjectLabel::Interphase);
        let first = obs.as_dummy(Vector3::zeros());
        let second = first.as_dummy(Vector3::zeros());
        assert_eq!(second.t, 12);
    }

    #[test]
    fn test_default_volume_is_unbounded() {
        let volume = Volume::default();
        for d in 0..DIMS {
            assert_eq!(volume.min_xyz[d], f64::NEG_INFINITY);
            assert_eq!(volume.max_xyz[d], f64::INFINITY);
        }
    }

    #[test]
    fn test_label_discriminants() {
        assert_eq!(ObjectLabel::Interphase as u8, 0);
        assert_eq!(ObjectLabel::Metaphase as u8, 2);
        assert_eq!(ObjectLabel::Anaphase as u8, 3);
        assert_eq!(ObjectLabel::Apoptosis as u8, 4);
        assert_eq!(ObjectLabel::Null as u8, 5);
    }
}
