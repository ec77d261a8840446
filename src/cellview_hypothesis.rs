//! The hypothesis engine - enumeration and scoring of lineage events.
//!
//! For every tracklet the engine emits the set of scored event hypotheses
//! that could explain its boundaries: false positive, initialization,
//! termination, apoptosis, link to a successor, and division into two
//! children. Scores are log-probabilities; a downstream global optimizer
//! selects a conflict-free subset.
//!
//! The enumeration is single-threaded and deterministic: tracklets are
//! visited in insertion order and the hash cube post-sorts its candidates
//! by track index.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cellview_cube::HypercubeBin;
use crate::cellview_objects::{ObjectLabel, Volume, DIMS};
use crate::cellview_tracklet::Tracklet;
use crate::error::TrackError;

/// Floor applied to every probability before taking its log, so that a
/// zero-probability event scores a large negative number instead of -inf.
pub const DEFAULT_LOW_PROBABILITY: f64 = 1e-308;

/// Division geometry weights, best (lowest) first. A metaphase parent with
/// two anaphase children is the canonical mitosis signature.
pub const WEIGHT_METAPHASE_ANAPHASE_ANAPHASE: f64 = 0.01;
pub const WEIGHT_METAPHASE_ANAPHASE: f64 = 0.1;
pub const WEIGHT_METAPHASE: f64 = 2.0;
pub const WEIGHT_ANAPHASE_ANAPHASE: f64 = 1.0;
pub const WEIGHT_ANAPHASE: f64 = 2.0;
pub const WEIGHT_OTHER: f64 = 5.0;

/// `log` clamped away from zero.
pub fn safe_log(value: f64) -> f64 {
    value.max(DEFAULT_LOW_PROBABILITY).ln()
}

/// Event kinds. Discriminants are stable wire values shared with the
/// downstream optimizer; `Dead` and `Undefined` are reserved sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum HypothesisKind {
    FalsePositive = 0,
    Initialization = 1,
    Termination = 2,
    Link = 3,
    Division = 4,
    Apoptosis = 5,
    Merge = 6,
    Dead = 666,
    Undefined = 999,
}

impl HypothesisKind {
    /// Stable integer value of this kind.
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Bit in the `hypotheses_to_generate` mask, for generatable kinds.
    fn bit(self) -> Option<u32> {
        match self {
            Self::Dead | Self::Undefined => None,
            kind => Some(1 << kind.index()),
        }
    }
}

impl TryFrom<u32> for HypothesisKind {
    type Error = TrackError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FalsePositive),
            1 => Ok(Self::Initialization),
            2 => Ok(Self::Termination),
            3 => Ok(Self::Link),
            4 => Ok(Self::Division),
            5 => Ok(Self::Apoptosis),
            6 => Ok(Self::Merge),
            666 => Ok(Self::Dead),
            999 => Ok(Self::Undefined),
            _ => Err(TrackError::NotDefined),
        }
    }
}

/// A scored claim about an event explaining a tracklet's boundary.
///
/// Track references are indices into the engine's insertion-ordered track
/// array; the engine owns the tracklets for the whole create/consume cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub kind: HypothesisKind,

    /// Focal tracklet.
    pub track: usize,

    /// Successor tracklet, for `Link` hypotheses.
    pub link_track: Option<usize>,

    /// Putative children, for `Division` hypotheses.
    pub child_tracks: Option<(usize, usize)>,

    /// Log-probability of the event. Always finite.
    pub log_probability: f64,
}

impl Hypothesis {
    fn new(kind: HypothesisKind, track: usize, log_probability: f64) -> Self {
        Self {
            kind,
            track,
            link_track: None,
            child_tracks: None,
            log_probability,
        }
    }

    fn link(track: usize, successor: usize, log_probability: f64) -> Self {
        Self {
            kind: HypothesisKind::Link,
            track,
            link_track: Some(successor),
            child_tracks: None,
            log_probability,
        }
    }

    fn division(track: usize, child_one: usize, child_two: usize, log_probability: f64) -> Self {
        Self {
            kind: HypothesisKind::Division,
            track,
            link_track: None,
            child_tracks: Some((child_one, child_two)),
            log_probability,
        }
    }
}

/// Tunable configuration for hypothesis generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisParams {
    /// Bitmask over the generatable kinds (`FalsePositive` = bit 0 through
    /// `Merge` = bit 6). False-positive hypotheses are emitted regardless.
    pub hypotheses_to_generate: u32,

    /// Per-observation miss rate of the segmentation; base of `P_FP`.
    pub segmentation_miss_rate: f64,

    /// Per-observation apoptosis survival base.
    pub apoptosis_rate: f64,

    /// Minimum trailing apoptotic count before an apoptosis hypothesis is
    /// emitted.
    pub apop_thresh: u32,

    /// Hard cutoff on link distance; also the cube's spatial bin size.
    pub dist_thresh: f64,

    /// Hard cutoff on link time gap; also the cube's temporal bin size.
    pub time_thresh: f64,

    /// Border neighborhood enabling init/term hypotheses.
    pub theta_dist: f64,

    /// Frame-edge neighborhood enabling init/term hypotheses.
    pub theta_time: f64,

    /// Exponential decay constants.
    pub lambda_dist: f64,
    pub lambda_time: f64,
    pub lambda_link: f64,
    pub lambda_branch: f64,

    /// Fallback probability when neither init/term criterion applies, and
    /// the score of forbidden links.
    pub eta: f64,

    /// Suppress the spatial/temporal guards gating init/term emission.
    pub relax: bool,
}

impl Default for HypothesisParams {
    fn default() -> Self {
        Self {
            hypotheses_to_generate: 0b11_1111, // everything except merge
            segmentation_miss_rate: 0.1,
            apoptosis_rate: 0.001,
            apop_thresh: 5,
            dist_thresh: 40.0,
            time_thresh: 2.0,
            theta_dist: 20.0,
            theta_time: 5.0,
            lambda_dist: 3.0,
            lambda_time: 5.0,
            lambda_link: 10.0,
            lambda_branch: 50.0,
            eta: 1e-10,
            relax: false,
        }
    }
}

impl HypothesisParams {
    /// Validate rates, probabilities and thresholds.
    pub fn validate(&self) -> Result<(), TrackError> {
        let open_unit = |v: f64| v > 0.0 && v < 1.0;

        if !open_unit(self.segmentation_miss_rate) || !open_unit(self.apoptosis_rate) {
            return Err(TrackError::AccuracyOutOfRange);
        }
        if !open_unit(self.eta) {
            return Err(TrackError::ProbNotAssignOutOfRange);
        }
        // The thresholds double as the cube's bin sizes
        if self.dist_thresh <= 0.0 || self.time_thresh <= 0.0 {
            return Err(TrackError::AccuracyOutOfRange);
        }
        Ok(())
    }
}

/// Euclidean distance between one track's terminus and another's origin.
fn link_distance(trk: &Tracklet, candidate: &Tracklet) -> f64 {
    (trk.last().position - candidate.first().position).norm()
}

/// Frame gap between one track's terminus and another's origin.
fn link_time(trk: &Tracklet, candidate: &Tracklet) -> i64 {
    candidate.first().t - trk.last().t
}

/// Length of the contiguous apoptotic run at the end of a track.
///
/// Apoptotic labels earlier in the track that do not touch the terminus
/// are deliberately ignored.
pub fn count_apoptosis(trk: &Tracklet) -> u32 {
    trk.observations()
        .iter()
        .rev()
        .take_while(|obs| obs.label == ObjectLabel::Apoptosis)
        .count() as u32
}

/// Enumerates and scores event hypotheses over a set of tracklets.
#[derive(Debug)]
pub struct HypothesisEngine {
    frame_range: [i64; 2],
    params: HypothesisParams,
    volume: Volume,
    tracks: Vec<Tracklet>,
    cube: HypercubeBin,
    hypotheses: Vec<Hypothesis>,
}

impl HypothesisEngine {
    /// Create an engine over the frame range `[start, stop]`.
    ///
    /// The volume defaults to unbounded; call [`set_volume`] to enable
    /// border-gated hypotheses.
    ///
    /// [`set_volume`]: Self::set_volume
    pub fn new(start: i64, stop: i64, params: HypothesisParams) -> Result<Self, TrackError> {
        params.validate()?;

        let engine = Self {
            frame_range: [start, stop],
            cube: HypercubeBin::new(params.dist_thresh, params.time_thresh),
            params,
            volume: Volume::default(),
            tracks: Vec::new(),
            hypotheses: Vec::new(),
        };

        debug!(
            false_positive = engine.hypothesis_allowed(HypothesisKind::FalsePositive),
            initialization = engine.hypothesis_allowed(HypothesisKind::Initialization),
            termination = engine.hypothesis_allowed(HypothesisKind::Termination),
            link = engine.hypothesis_allowed(HypothesisKind::Link),
            division = engine.hypothesis_allowed(HypothesisKind::Division),
            apoptosis = engine.hypothesis_allowed(HypothesisKind::Apoptosis),
            merge = engine.hypothesis_allowed(HypothesisKind::Merge),
            "hypothesis kinds enabled"
        );

        Ok(engine)
    }

    /// Set the field-of-view bounding box.
    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Take ownership of a tracklet and index it.
    ///
    /// Must not be called concurrently with [`create`](Self::create).
    pub fn add_track(&mut self, tracklet: Tracklet) {
        let index = self.tracks.len();
        self.cube.add_tracklet(index, &tracklet);
        self.tracks.push(tracklet);
    }

    /// All tracklets, in insertion order.
    pub fn tracks(&self) -> &[Tracklet] {
        &self.tracks
    }

    /// Tracklet behind a hypothesis reference.
    pub fn track(&self, index: usize) -> &Tracklet {
        &self.tracks[index]
    }

    /// Hypotheses emitted by the last [`create`](Self::create) call.
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    /// Whether a kind is selected by the `hypotheses_to_generate` mask.
    /// The reserved sentinels are never generatable.
    pub fn hypothesis_allowed(&self, kind: HypothesisKind) -> bool {
        match kind.bit() {
            Some(bit) => self.params.hypotheses_to_generate & bit != 0,
            None => false,
        }
    }

    /// Enumerate hypotheses for every tracklet.
    ///
    /// The buffer is rebuilt from scratch on every call. Emission order is
    /// per tracklet, in insertion order: false positive, initialization,
    /// termination, apoptosis, then one link per candidate and one division
    /// per unordered candidate pair.
    pub fn create(&mut self) {
        self.hypotheses.clear();
        if self.tracks.is_empty() {
            return;
        }

        let mut hypotheses: Vec<Hypothesis> = Vec::with_capacity(self.tracks.len() * 5);

        for index in 0..self.tracks.len() {
            let trk = &self.tracks[index];

            // The false positive hypothesis is the baseline every other
            // hypothesis competes against; it ignores the enable mask.
            hypotheses.push(Hypothesis::new(
                HypothesisKind::FalsePositive,
                index,
                safe_log(self.p_false_positive(trk)),
            ));

            let d_start = self.dist_from_border(trk, true);
            let d_stop = self.dist_from_border(trk, false);

            if self.hypothesis_allowed(HypothesisKind::Initialization) {
                let near_front = (trk.first().t as f64)
                    < self.frame_range[0] as f64 + self.params.theta_time;
                if self.params.relax || near_front || d_start < self.params.theta_dist {
                    let score = safe_log(self.p_init(trk)) + 0.5 * safe_log(self.p_true_positive(trk));
                    hypotheses.push(Hypothesis::new(HypothesisKind::Initialization, index, score));
                }
            }

            if self.hypothesis_allowed(HypothesisKind::Termination) {
                let near_back = ((self.frame_range[1] - trk.last().t) as f64) < self.params.theta_time;
                if self.params.relax || near_back || d_stop < self.params.theta_dist {
                    let score = safe_log(self.p_term(trk)) + 0.5 * safe_log(self.p_true_positive(trk));
                    hypotheses.push(Hypothesis::new(HypothesisKind::Termination, index, score));
                }
            }

            let n_apoptosis = count_apoptosis(trk);
            if self.hypothesis_allowed(HypothesisKind::Apoptosis) && n_apoptosis > self.params.apop_thresh
            {
                let score = safe_log(self.p_dead(trk, n_apoptosis))
                    + 0.5 * safe_log(self.p_true_positive(trk));
                hypotheses.push(Hypothesis::new(HypothesisKind::Apoptosis, index, score));
            }

            // Candidates that could continue this track. Two or more of
            // them conflicting over the same parent is the division signal,
            // so conflicts are collected even when linking is disabled.
            let mut conflicts: Vec<usize> = Vec::new();

            for candidate_index in self.cube.get(index, trk, false) {
                let candidate = &self.tracks[candidate_index];

                let d = link_distance(trk, candidate);
                let dt = link_time(trk, candidate);

                if d >= self.params.dist_thresh {
                    continue;
                }
                if dt as f64 >= self.params.time_thresh || dt < 1 {
                    continue;
                }

                if self.hypothesis_allowed(HypothesisKind::Link) {
                    let score = safe_log(self.p_link(trk, candidate, d, dt as f64))
                        + 0.5 * safe_log(self.p_true_positive(trk))
                        + 0.5 * safe_log(self.p_true_positive(candidate));
                    hypotheses.push(Hypothesis::link(index, candidate_index, score));
                }

                conflicts.push(candidate_index);
            }

            if conflicts.len() < 2 {
                continue;
            }

            for p in 0..conflicts.len() {
                for q in p + 1..conflicts.len() {
                    if self.hypothesis_allowed(HypothesisKind::Division) {
                        let child_one = &self.tracks[conflicts[p]];
                        let child_two = &self.tracks[conflicts[q]];
                        let score = safe_log(self.p_branch(trk, child_one, child_two))
                            + 0.5 * safe_log(self.p_true_positive(trk))
                            + 0.5 * safe_log(self.p_true_positive(child_one))
                            + 0.5 * safe_log(self.p_true_positive(child_two));
                        hypotheses.push(Hypothesis::division(
                            index,
                            conflicts[p],
                            conflicts[q],
                            score,
                        ));
                    }
                }
            }
        }

        debug!(
            tracks = self.tracks.len(),
            hypotheses = hypotheses.len(),
            "hypothesis enumeration complete"
        );
        self.hypotheses = hypotheses;
    }

    /// Minimum distance from the track's first or last observation to the
    /// volume border, skipping degenerate dimensions. Infinite when every
    /// dimension is degenerate.
    fn dist_from_border(&self, trk: &Tracklet, at_start: bool) -> f64 {
        let xyz = if at_start {
            trk.first().position
        } else {
            trk.last().position
        };

        let mut min_dist = f64::INFINITY;
        for dim in 0..DIMS {
            if self.volume.min_xyz[dim] == self.volume.max_xyz[dim] {
                continue;
            }
            let d = (xyz[dim] - self.volume.min_xyz[dim]).min(self.volume.max_xyz[dim] - xyz[dim]);
            if d < min_dist {
                min_dist = d;
            }
        }
        min_dist
    }

    /// Probability that the whole track is a segmentation artefact.
    fn p_false_positive(&self, trk: &Tracklet) -> f64 {
        self.params
            .segmentation_miss_rate
            .powi((trk.duration() + 1) as i32)
    }

    /// Complement of [`p_false_positive`](Self::p_false_positive).
    fn p_true_positive(&self, trk: &Tracklet) -> f64 {
        1.0 - self.p_false_positive(trk)
    }

    /// Probability of a true initialization. These occur close to the
    /// start of the sequence or at the periphery of the field of view.
    fn p_init(&self, trk: &Tracklet) -> f64 {
        let dist = self.dist_from_border(trk, true);

        let mut prob = [0.0_f64; 2];
        let mut init = false;

        if (trk.first().t as f64) < self.frame_range[0] as f64 + self.params.theta_time {
            prob[0] =
                (-((trk.first().t - self.frame_range[0]) as f64 + 1.0) / self.params.lambda_time)
                    .exp();
            init = true;
        }

        if dist < self.params.theta_dist || self.params.relax {
            prob[1] = (-dist / self.params.lambda_dist).exp();
            init = true;
        }

        if init {
            prob[0].max(prob[1])
        } else {
            self.params.eta
        }
    }

    /// Probability of a true termination; the mirror of
    /// [`p_init`](Self::p_init) at the end of the track.
    fn p_term(&self, trk: &Tracklet) -> f64 {
        let dist = self.dist_from_border(trk, false);

        let mut prob = [0.0_f64; 2];
        let mut term = false;

        if ((self.frame_range[1] - trk.last().t) as f64) < self.params.theta_time {
            prob[0] = (-((self.frame_range[1] - trk.last().t) as f64) / self.params.lambda_time)
                .exp();
            term = true;
        }

        if dist < self.params.theta_dist || self.params.relax {
            prob[1] = (-dist / self.params.lambda_dist).exp();
            term = true;
        }

        if term {
            prob[0].max(prob[1])
        } else {
            self.params.eta
        }
    }

    /// Probability of apoptotic death, discounted near the volume border
    /// where a disappearance is more plausibly the cell leaving the view.
    fn p_dead(&self, trk: &Tracklet, n_apoptosis: u32) -> f64 {
        let dist = self.dist_from_border(trk, false);
        let discount = 1.0 - (-dist / self.params.lambda_dist).exp();
        (1.0 - self.params.apoptosis_rate.powi(n_apoptosis as i32)) * discount
    }

    /// [`p_dead`](Self::p_dead) with the apoptotic count taken from the
    /// track itself.
    fn p_dead_counted(&self, trk: &Tracklet) -> f64 {
        self.p_dead(trk, count_apoptosis(trk))
    }

    /// Probability that `candidate` continues `trk`. Requires `dt > 0`.
    ///
    /// A metaphase terminus followed by an anaphase origin is the division
    /// signature, so it is forbidden as a plain link and scores `eta`.
    fn p_link(&self, trk: &Tracklet, candidate: &Tracklet, d: f64, dt: f64) -> f64 {
        if trk.last().label == ObjectLabel::Metaphase
            && candidate.first().label == ObjectLabel::Anaphase
        {
            return self.params.eta;
        }

        debug_assert!(dt > 0.0, "link candidates must look forward in time");

        // dt acts as a linear scaling penalty on the distance
        (-(d * dt) / self.params.lambda_link).exp()
    }

    /// Probability that `trk` divided into `child_one` and `child_two`.
    ///
    /// The normalized vectors from the parent terminus to each child origin
    /// have dot product -1 when the daughters sit on opposite sides of the
    /// parent (the ideal division geometry) and +1 when they coincide.
    fn p_branch(&self, trk: &Tracklet, child_one: &Tracklet, child_two: &Tracklet) -> f64 {
        let u = (child_one.first().position - trk.last().position).normalize();
        let v = (child_two.first().position - trk.last().position).normalize();
        let dot_product = u.dot(&v);

        let one_anaphase = child_one.first().label == ObjectLabel::Anaphase;
        let two_anaphase = child_two.first().label == ObjectLabel::Anaphase;

        let weight = if trk.last().label == ObjectLabel::Metaphase {
            if one_anaphase && two_anaphase {
                WEIGHT_METAPHASE_ANAPHASE_ANAPHASE
            } else if one_anaphase || two_anaphase {
                WEIGHT_METAPHASE_ANAPHASE
            } else {
                WEIGHT_METAPHASE
            }
        } else if one_anaphase && two_anaphase {
            WEIGHT_ANAPHASE_ANAPHASE
        } else if one_anaphase || two_anaphase {
            WEIGHT_ANAPHASE
        } else {
            // None of the mitotic criteria hold; penalize children that
            // look apoptotic
            WEIGHT_OTHER + 10.0 * self.p_dead_counted(child_one) + 10.0 * self.p_dead_counted(child_two)
        };

        // erf maps the dot product to ~[0, 1] so the ideal opposing
        // geometry minimises delta_g
        let delta_g =
            weight * (1.0 - libm::erf(dot_product / (3.0 * std::f64::consts::SQRT_2))) / 2.0;

        (-delta_g / (2.0 * self.params.lambda_branch)).exp()
    }
}
