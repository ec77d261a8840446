//! Motion model - per-tracklet Kalman prediction.
//!
//! Each tracklet owns one motion model, cloned from a canonical template
//! when the tracklet is created so that every track diverges independently.
//! The core depends only on the narrow `setup`/`update`/`predict`/
//! `motion_vector` surface; concrete models live behind the `MotionModel`
//! tagged variant.

use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::cellview_objects::Observation;

/// A 3-D Gaussian forecast of a tracklet's next position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Mean position.
    pub mu: Vector3<f64>,

    /// 3x3 symmetric positive semi-definite covariance.
    pub covar: Matrix3<f64>,
}

/// Raw one-step forecast of the full filter state (position + velocity).
///
/// One of these is recorded per append alongside the engine-level
/// `Prediction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEstimate {
    pub mu: Vector6<f64>,
    pub covar: Matrix6<f64>,
}

/// Linear Kalman filter over a 6-DOF state [x, y, z, vx, vy, vz] with a
/// unit frame step.
///
/// Velocities are expressed per frame, so the motion vector is the
/// velocity block of the state directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantVelocityFilter {
    /// Current state estimate.
    state: Vector6<f64>,

    /// Current state covariance.
    covariance: Matrix6<f64>,

    /// State transition F (constant velocity, dt = 1 frame).
    transition: Matrix6<f64>,

    /// Process noise Q.
    process_noise: Matrix6<f64>,

    /// Measurement noise R (positions only).
    measurement_noise: Matrix3<f64>,

    /// Covariance the filter is reset to on `setup`.
    initial_covariance: Matrix6<f64>,
}

impl ConstantVelocityFilter {
    /// Create a filter with explicit noise terms.
    ///
    /// # Arguments
    /// * `process_sigma` - per-frame process noise standard deviation
    /// * `measurement_sigma` - localisation noise standard deviation
    /// * `initial_sigma` - initial state uncertainty standard deviation
    pub fn new(process_sigma: f64, measurement_sigma: f64, initial_sigma: f64) -> Self {
        let mut transition = Matrix6::identity();
        transition[(0, 3)] = 1.0;
        transition[(1, 4)] = 1.0;
        transition[(2, 5)] = 1.0;

        Self {
            state: Vector6::zeros(),
            covariance: Matrix6::identity() * initial_sigma * initial_sigma,
            transition,
            process_noise: Matrix6::identity() * process_sigma * process_sigma,
            measurement_noise: Matrix3::identity() * measurement_sigma * measurement_sigma,
            initial_covariance: Matrix6::identity() * initial_sigma * initial_sigma,
        }
    }

    /// Initialize the filter from the first observation of a track.
    pub fn setup(&mut self, obs: &Observation) {
        self.state = Vector6::new(
            obs.position.x,
            obs.position.y,
            obs.position.z,
            0.0,
            0.0,
            0.0,
        );
        self.covariance = self.initial_covariance;
    }

    /// Incorporate a new observation: time-update then position correction.
    pub fn update(&mut self, obs: &Observation) {
        // Time update
        let x_pred = self.transition * self.state;
        let p_pred =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        // Measurement update against the observed position
        let h = Self::observation_matrix();
        let innovation = obs.position - h * x_pred;
        let s = h * p_pred * h.transpose() + self.measurement_noise;

        match s.try_inverse() {
            Some(s_inv) => {
                let gain = p_pred * h.transpose() * s_inv;
                self.state = x_pred + gain * innovation;
                self.covariance = (Matrix6::identity() - gain * h) * p_pred;
            }
            None => {
                // Singular innovation covariance: keep the forecast
                self.state = x_pred;
                self.covariance = p_pred;
            }
        }
    }

    /// Forecast the state one frame ahead without mutating the filter.
    pub fn predict(&self) -> StateEstimate {
        StateEstimate {
            mu: self.transition * self.state,
            covar: self.transition * self.covariance * self.transition.transpose()
                + self.process_noise,
        }
    }

    /// Current per-frame displacement estimate.
    pub fn motion_vector(&self) -> Vector3<f64> {
        Vector3::new(self.state[3], self.state[4], self.state[5])
    }

    fn observation_matrix() -> Matrix3x6<f64> {
        let mut h = Matrix3x6::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h[(2, 2)] = 1.0;
        h
    }
}

impl Default for ConstantVelocityFilter {
    fn default() -> Self {
        Self::new(0.5, 1.0, 10.0)
    }
}

/// The motion model owned by each tracklet.
///
/// A tagged variant rather than a trait object so tracklets stay plainly
/// cloneable and serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MotionModel {
    ConstantVelocity(ConstantVelocityFilter),
}

impl MotionModel {
    /// Initialize from the first observation.
    pub fn setup(&mut self, obs: &Observation) {
        match self {
            Self::ConstantVelocity(filter) => filter.setup(obs),
        }
    }

    /// Incorporate a new observation.
    pub fn update(&mut self, obs: &Observation) {
        match self {
            Self::ConstantVelocity(filter) => filter.update(obs),
        }
    }

    /// One-step forecast of the full filter state.
    pub fn predict(&self) -> StateEstimate {
        match self {
            Self::ConstantVelocity(filter) => filter.predict(),
        }
    }

    /// Current per-frame displacement estimate.
    pub fn motion_vector(&self) -> Vector3<f64> {
        match self {
            Self::ConstantVelocity(filter) => filter.motion_vector(),
        }
    }
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::ConstantVelocity(ConstantVelocityFilter::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellview_objects::ObjectLabel;

    fn obs_at(t: i64, x: f64) -> Observation {
        Observation::new(1, t, Vector3::new(x, 0.0, 0.0), ObjectLabel::Interphase)
    }

    #[test]
    fn test_setup_zeroes_velocity() {
        let mut model = MotionModel::default();
        model.setup(&obs_at(0, 5.0));
        assert_eq!(model.motion_vector(), Vector3::zeros());
    }

    #[test]
    fn test_velocity_converges_to_displacement() {
        let mut model = MotionModel::default();
        model.setup(&obs_at(0, 0.0));

        // Constant motion of +1 per frame
        for t in 1..20 {
            model.update(&obs_at(t, t as f64));
        }

        let v = model.motion_vector();
        assert!((v.x - 1.0).abs() < 0.1, "vx = {} should approach 1", v.x);
        assert!(v.y.abs() < 1e-9);
        assert!(v.z.abs() < 1e-9);
    }

    #[test]
    fn test_predict_does_not_mutate() {
        let mut model = MotionModel::default();
        model.setup(&obs_at(0, 2.0));
        model.update(&obs_at(1, 3.0));

        let before = model.predict();
        let _ = model.predict();
        let after = model.predict();

        assert_eq!(before.mu, after.mu);
        assert_eq!(before.covar, after.covar);
    }

    #[test]
    fn test_forecast_covariance_grows_with_process_noise() {
        let mut model = ConstantVelocityFilter::new(1.0, 1.0, 1.0);
        model.setup(&obs_at(0, 0.0));

        let forecast = model.predict();
        // Q is added on top of the propagated covariance
        assert!(forecast.covar[(0, 0)] > 1.0);
        // Symmetry is preserved by the propagation
        let diff = (forecast.covar - forecast.covar.transpose()).norm();
        assert!(diff < 1e-12);
    }
}
