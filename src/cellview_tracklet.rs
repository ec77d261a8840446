//! Tracklets - contiguous runs of per-frame observations.
//!
//! A tracklet owns its observations and its motion model exclusively.
//! Three parallel sequences are maintained in lockstep: the observations,
//! the engine-level position predictions, and the raw filter forecasts.
//! Frames where the cell was lost are in-filled with dummy observations at
//! the predicted position and trimmed once the track is finalized.

use serde::{Deserialize, Serialize};

use nalgebra::Vector3;

use crate::cellview_motion::{MotionModel, Prediction, StateEstimate};
use crate::cellview_objects::Observation;
use crate::error::TrackError;

/// Hard ceiling on the dummy in-fill run of a single tracklet.
pub const MAX_LOST: u32 = 5;

/// Tracks longer than this are split by the upstream association stage
/// before they reach the hypothesis engine.
pub const MAX_TRACK_LEN: usize = 150;

/// A contiguous sequence of observations attributed to one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracklet {
    /// Track identifier.
    pub id: u32,

    track: Vec<Observation>,
    prediction: Vec<Prediction>,
    kalman: Vec<StateEstimate>,
    motion_model: MotionModel,
    max_lost: u32,

    /// Consecutive dummy appends since the last real observation.
    lost: u32,

    /// Marked by the downstream optimizer when the track is discarded.
    pub remove_flag: bool,

    /// Lineage fields, written by the downstream optimizer. Never read by
    /// the core.
    pub parent: u32,
    pub root: u32,
    pub children: Vec<u32>,
}

impl Tracklet {
    /// Start a new tracklet from its first observation.
    ///
    /// The model template is cloned and initialized on the observation;
    /// the observation is then appended without a second model update.
    pub fn new(
        id: u32,
        first: Observation,
        max_lost: u32,
        model_template: &MotionModel,
    ) -> Result<Self, TrackError> {
        if max_lost > MAX_LOST {
            return Err(TrackError::MaxLostOutOfRange);
        }

        let mut motion_model = model_template.clone();
        motion_model.setup(&first);

        let mut tracklet = Self {
            id,
            track: Vec::new(),
            prediction: Vec::new(),
            kalman: Vec::new(),
            motion_model,
            max_lost,
            lost: 0,
            remove_flag: false,
            parent: 0,
            root: id,
            children: Vec::new(),
        };
        tracklet.push(first, false);
        Ok(tracklet)
    }

    /// Append a real observation, updating the motion model.
    pub fn append(&mut self, obs: Observation) {
        self.push(obs, true);
    }

    /// Append a dummy observation at the predicted position, one frame
    /// after the current terminus. No-op once `lost` has reached the
    /// tracklet's `max_lost`.
    pub fn append_dummy(&mut self) {
        if self.lost >= self.max_lost {
            return;
        }
        let p = self.predict();
        let dummy = self.last().as_dummy(p.mu);
        self.push(dummy, false);
    }

    fn push(&mut self, obs: Observation, update: bool) {
        let dummy = obs.dummy;

        if update {
            self.motion_model.update(&obs);
        }
        self.track.push(obs);

        // One prediction and one raw forecast per observation
        let prediction = self.predict();
        let forecast = self.motion_model.predict();
        self.prediction.push(prediction);
        self.kalman.push(forecast);

        if dummy {
            self.lost += 1;
        } else {
            self.lost = 0;
        }
    }

    /// Drop trailing dummy observations, keeping the parallel sequences in
    /// lockstep. Always returns true.
    pub fn trim(&mut self) -> bool {
        while self.track.len() > 1 && self.track[self.track.len() - 1].dummy {
            self.track.pop();
            self.prediction.pop();
            self.kalman.pop();
        }
        true
    }

    /// Forecast the next position: the current terminus displaced by the
    /// motion vector, with the positional block of the filter covariance.
    pub fn predict(&self) -> Prediction {
        let forecast = self.motion_model.predict();
        Prediction {
            mu: self.position() + self.motion_model.motion_vector(),
            covar: forecast.covar.fixed_view::<3, 3>(0, 0).into(),
        }
    }

    /// First observation of the track.
    pub fn first(&self) -> &Observation {
        &self.track[0]
    }

    /// Last observation of the track.
    pub fn last(&self) -> &Observation {
        &self.track[self.track.len() - 1]
    }

    /// Position of the current terminus.
    pub fn position(&self) -> Vector3<f64> {
        self.last().position
    }

    /// Elapsed frames between the first and last observation.
    pub fn duration(&self) -> i64 {
        self.last().t - self.first().t
    }

    /// Number of observations, dummies included.
    pub fn length(&self) -> usize {
        self.track.len()
    }

    /// All observations in time order.
    pub fn observations(&self) -> &[Observation] {
        &self.track
    }

    /// Per-append engine-level predictions.
    pub fn predictions(&self) -> &[Prediction] {
        &self.prediction
    }

    /// Per-append raw filter forecasts.
    pub fn kalman_estimates(&self) -> &[StateEstimate] {
        &self.kalman
    }

    /// Consecutive dummy appends since the last real observation.
    pub fn lost(&self) -> u32 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellview_objects::ObjectLabel;
    use nalgebra::Vector3;

    fn obs(id: u32, t: i64, x: f64) -> Observation {
        Observation::new(id, t, Vector3::new(x, 0.0, 0.0), ObjectLabel::Interphase)
    }

    fn tracklet() -> Tracklet {
        Tracklet::new(1, obs(10, 0, 0.0), MAX_LOST, &MotionModel::default()).unwrap()
    }

    #[test]
    fn test_new_records_one_of_each() {
        let trk = tracklet();
        assert_eq!(trk.length(), 1);
        assert_eq!(trk.predictions().len(), 1);
        assert_eq!(trk.kalman_estimates().len(), 1);
        assert_eq!(trk.lost(), 0);
        assert_eq!(trk.duration(), 0);
    }

    #[test]
    fn test_max_lost_out_of_range() {
        let result = Tracklet::new(1, obs(10, 0, 0.0), MAX_LOST + 1, &MotionModel::default());
        assert_eq!(result.unwrap_err(), TrackError::MaxLostOutOfRange);
    }

    #[test]
    fn test_parallel_sequences_stay_in_lockstep() {
        let mut trk = tracklet();
        for t in 1..6 {
            trk.append(obs(10 + t as u32, t, t as f64));
            assert_eq!(trk.length(), trk.predictions().len());
            assert_eq!(trk.length(), trk.kalman_estimates().len());
        }
    }

    #[test]
    fn test_lost_resets_on_real_append() {
        let mut trk = tracklet();
        trk.append_dummy();
        trk.append_dummy();
        assert_eq!(trk.lost(), 2);

        trk.append(obs(11, trk.last().t + 1, 3.0));
        assert_eq!(trk.lost(), 0);
    }

    #[test]
    fn test_append_dummy_saturates_at_max_lost() {
        let mut trk = tracklet();
        for _ in 0..MAX_LOST + 3 {
            trk.append_dummy();
        }
        assert_eq!(trk.lost(), MAX_LOST);
        // Only MAX_LOST dummies were actually appended
        assert_eq!(trk.length(), 1 + MAX_LOST as usize);
    }

    #[test]
    fn test_dummy_steps_time_by_one_per_call() {
        let mut trk = tracklet();
        trk.append_dummy();
        trk.append_dummy();
        let times: Vec<i64> = trk.observations().iter().map(|o| o.t).collect();
        assert_eq!(times, vec![0, 1, 2]);
        assert!(trk.observations()[1].dummy);
        assert_eq!(trk.observations()[1].id, 0);
    }

    #[test]
    fn test_dummy_uses_predicted_position() {
        let mut trk = tracklet();
        // Establish motion of +1 per frame
        for t in 1..10 {
            trk.append(obs(11, t, t as f64));
        }
        let expected = trk.predict().mu;
        trk.append_dummy();
        assert_eq!(trk.last().position, expected);
        // A moving track predicts ahead of its terminus
        assert!(trk.last().position.x > 9.0);
    }

    #[test]
    fn test_trim_drops_trailing_dummies() {
        let mut trk = tracklet();
        trk.append(obs(11, 1, 1.0));
        trk.append_dummy();
        trk.append_dummy();
        assert_eq!(trk.length(), 4);

        assert!(trk.trim());
        assert_eq!(trk.length(), 2);
        assert_eq!(trk.predictions().len(), 2);
        assert_eq!(trk.kalman_estimates().len(), 2);
        assert!(!trk.last().dummy);
    }

    #[test]
    fn test_trim_keeps_interior_dummies() {
        let mut trk = tracklet();
        trk.append_dummy();
        trk.append(obs(11, trk.last().t + 1, 2.0));
        assert!(trk.trim());
        // The interior dummy is not trailing, so it survives
        assert_eq!(trk.length(), 3);
    }

    #[test]
    fn test_predict_extrapolates_along_motion() {
        let mut trk = tracklet();
        for t in 1..8 {
            trk.append(obs(11, t, 2.0 * t as f64));
        }
        let p = trk.predict();
        // Steady +2/frame motion: the forecast lands ahead of the terminus
        assert!(p.mu.x > trk.position().x + 1.0);
        assert!(p.mu.x < trk.position().x + 3.0);
        assert!(p.mu.y.abs() < 1e-9);
        // Covariance block is symmetric
        assert!((p.covar - p.covar.transpose()).norm() < 1e-12);
    }
}
