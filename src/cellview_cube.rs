//! Spatiotemporal hash cube - the index that keeps link enumeration
//! sub-quadratic.
//!
//! Tracklets are bucketed by the quantized position and time of their
//! last observation; a query returns the union of the 3x3x3x3 bucket
//! neighborhood around the query tracklet's terminus. With bin sizes equal
//! to the link thresholds, every admissible candidate falls inside that
//! neighborhood.

use std::collections::HashMap;

use crate::cellview_objects::Observation;
use crate::cellview_tracklet::Tracklet;

/// 4-D quantization bucket key.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
struct CubeKey {
    x: i64,
    y: i64,
    z: i64,
    t: i64,
}

impl CubeKey {
    fn from_observation(obs: &Observation, dist_bin: f64, time_bin: f64) -> Self {
        Self {
            x: (obs.position.x / dist_bin).floor() as i64,
            y: (obs.position.y / dist_bin).floor() as i64,
            z: (obs.position.z / dist_bin).floor() as i64,
            t: (obs.t as f64 / time_bin).floor() as i64,
        }
    }

    /// The 81 buckets adjacent to this one, itself included.
    fn neighborhood(self) -> impl Iterator<Item = CubeKey> {
        (-1_i64..=1).flat_map(move |dx| {
            (-1_i64..=1).flat_map(move |dy| {
                (-1_i64..=1).flat_map(move |dz| {
                    (-1_i64..=1).map(move |dt| CubeKey {
                        x: self.x + dx,
                        y: self.y + dy,
                        z: self.z + dz,
                        t: self.t + dt,
                    })
                })
            })
        })
    }
}

/// Spatiotemporal index over tracklets, keyed by each tracklet's terminus.
///
/// Tracklets are referred to by their index in the engine's insertion-ordered
/// track array.
#[derive(Debug, Clone)]
pub struct HypercubeBin {
    bins: HashMap<CubeKey, Vec<usize>>,
    dist_bin: f64,
    time_bin: f64,
}

impl HypercubeBin {
    /// Create an empty index with the given bin sizes.
    pub fn new(dist_bin: f64, time_bin: f64) -> Self {
        Self {
            bins: HashMap::new(),
            dist_bin,
            time_bin,
        }
    }

    /// Insert a tracklet into the bucket of its last observation.
    pub fn add_tracklet(&mut self, index: usize, tracklet: &Tracklet) {
        let key = CubeKey::from_observation(tracklet.last(), self.dist_bin, self.time_bin);
        self.bins.entry(key).or_default().push(index);
    }

    /// All tracklet indices in the 3x3x3x3 neighborhood around `tracklet`'s
    /// terminus.
    ///
    /// The result is sorted ascending by track index (engine insertion
    /// order); callers get a deterministic candidate order independent of
    /// hash-map iteration.
    pub fn get(&self, index: usize, tracklet: &Tracklet, include_self: bool) -> Vec<usize> {
        let centre = CubeKey::from_observation(tracklet.last(), self.dist_bin, self.time_bin);

        let mut found = Vec::new();
        for key in centre.neighborhood() {
            if let Some(indices) = self.bins.get(&key) {
                found.extend(
                    indices
                        .iter()
                        .copied()
                        .filter(|&i| include_self || i != index),
                );
            }
        }
        found.sort_unstable();
        found
    }

    /// Number of occupied buckets.
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellview_motion::MotionModel;
    use crate::cellview_objects::{ObjectLabel, Observation};
    use crate::cellview_tracklet::MAX_LOST;
    use nalgebra::Vector3;

    fn tracklet_at(id: u32, t: i64, x: f64, y: f64, z: f64) -> Tracklet {
        let obs = Observation::new(id, t, Vector3::new(x, y, z), ObjectLabel::Interphase);
        Tracklet::new(id, obs, MAX_LOST, &MotionModel::default()).unwrap()
    }

    #[test]
    fn test_neighbors_within_one_bin_are_found() {
        let mut cube = HypercubeBin::new(10.0, 2.0);
        let a = tracklet_at(1, 10, 0.0, 0.0, 0.0);
        let b = tracklet_at(2, 11, 5.0, 0.0, 0.0);

        cube.add_tracklet(0, &a);
        cube.add_tracklet(1, &b);

        assert_eq!(cube.get(0, &a, false), vec![1]);
        assert_eq!(cube.get(0, &a, true), vec![0, 1]);
    }

    #[test]
    fn test_distant_tracklets_are_not_returned() {
        let mut cube = HypercubeBin::new(10.0, 2.0);
        let a = tracklet_at(1, 10, 0.0, 0.0, 0.0);
        // Two full bins away in x, and two in t
        let far_space = tracklet_at(2, 10, 25.0, 0.0, 0.0);
        let far_time = tracklet_at(3, 16, 0.0, 0.0, 0.0);

        cube.add_tracklet(0, &a);
        cube.add_tracklet(1, &far_space);
        cube.add_tracklet(2, &far_time);

        assert!(cube.get(0, &a, false).is_empty());
    }

    #[test]
    fn test_negative_coordinates_bin_correctly() {
        let mut cube = HypercubeBin::new(10.0, 2.0);
        let a = tracklet_at(1, 10, 0.5, 0.0, 0.0);
        let b = tracklet_at(2, 10, -0.5, 0.0, 0.0);

        cube.add_tracklet(0, &a);
        cube.add_tracklet(1, &b);

        // Adjacent bins across the origin still see each other
        assert_eq!(cube.get(0, &a, false), vec![1]);
        assert_eq!(cube.get(1, &b, false), vec![0]);
    }

    #[test]
    fn test_result_is_sorted_by_track_index() {
        let mut cube = HypercubeBin::new(10.0, 2.0);
        let tracks: Vec<Tracklet> = (0..6)
            .map(|i| tracklet_at(i as u32, 10, i as f64, 0.0, 0.0))
            .collect();
        // Insert in scrambled order
        for &i in &[3usize, 0, 5, 1, 4, 2] {
            cube.add_tracklet(i, &tracks[i]);
        }

        let result = cube.get(0, &tracks[0], false);
        assert_eq!(result, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_indexed_by_terminus() {
        let mut cube = HypercubeBin::new(10.0, 2.0);
        let mut a = tracklet_at(1, 0, 0.0, 0.0, 0.0);
        for t in 1..=40 {
            a.append(Observation::new(
                1,
                t,
                Vector3::new(t as f64 * 2.0, 0.0, 0.0),
                ObjectLabel::Interphase,
            ));
        }
        cube.add_tracklet(0, &a);

        // A query near the terminus finds it
        let near_end = tracklet_at(2, 41, 80.0, 0.0, 0.0);
        cube.add_tracklet(1, &near_end);
        assert_eq!(cube.get(1, &near_end, false), vec![0]);

        // A query near the origin does not
        let near_start = tracklet_at(3, 1, 0.0, 0.0, 0.0);
        assert!(cube.get(2, &near_start, false).is_empty());
    }
}
