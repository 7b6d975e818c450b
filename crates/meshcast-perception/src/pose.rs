//! Pose Correlator.
//!
//! Headset poses arrive on their own stream, one per captured camera frame.
//! A detection set carries the capture stamp of the frame it was computed
//! from; [`PoseBuffer::resolve`] finds the pose recorded for exactly that
//! stamp.
//!
//! Frames are assumed to be detected in capture order, so once a detection
//! has matched a pose every older pose can be dropped.  Matching is exact:
//! a detection whose stamp never appeared on the pose stream cannot be
//! resolved.
//!
//! # Example
//!
//! ```rust
//! use meshcast_perception::pose::{PoseBuffer, PoseRecord, Stamp};
//! use nalgebra::Matrix4;
//!
//! let mut poses = PoseBuffer::new();
//! for sec in 1..=3 {
//!     poses.record(PoseRecord::new(Stamp::new(sec, 0), Matrix4::identity(), Matrix4::identity()));
//! }
//!
//! let pose = poses.resolve(Stamp::new(2, 0)).unwrap();
//! assert_eq!(pose.stamp, Stamp::new(2, 0));
//! // The pose at t=1 is gone; the matched pose stays buffered.
//! assert_eq!(poses.len(), 2);
//! ```

use std::fmt;

use nalgebra::Matrix4;
use tracing::{debug, trace};

// ────────────────────────────────────────────────────────────────────────────
// Stamp
// ────────────────────────────────────────────────────────────────────────────

/// Capture time of a camera frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stamp {
    pub sec: i32,
    pub nanosec: u32,
}

impl Stamp {
    pub fn new(sec: i32, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nanosec)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseRecord
// ────────────────────────────────────────────────────────────────────────────

/// The headset pose valid for one captured frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseRecord {
    pub stamp: Stamp,
    /// Camera → world transform, as sent by the headset (left-handed).
    pub world_matrix: Matrix4<f64>,
    /// Camera → normalized screen projection.
    pub projection_matrix: Matrix4<f64>,
}

impl PoseRecord {
    pub fn new(stamp: Stamp, world_matrix: Matrix4<f64>, projection_matrix: Matrix4<f64>) -> Self {
        Self {
            stamp,
            world_matrix,
            projection_matrix,
        }
    }

    /// Build from the row-major flattened matrices used on the wire.
    pub fn from_row_major(stamp: Stamp, world: &[f64; 16], projection: &[f64; 16]) -> Self {
        Self::new(
            stamp,
            Matrix4::from_row_slice(world),
            Matrix4::from_row_slice(projection),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A debug line reports the buffer size each time it grows by this many
/// unmatched poses.
const BACKLOG_REPORT_EVERY: usize = 64;

/// Pose samples in arrival order.
#[derive(Debug, Default)]
pub struct PoseBuffer {
    poses: Vec<PoseRecord>,
}

impl PoseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pose.  No ordering or duplicate checks are made.
    pub fn record(&mut self, pose: PoseRecord) {
        trace!(stamp = %pose.stamp, buffered = self.poses.len() + 1, "pose recorded");
        self.poses.push(pose);
        if is_backlog_milestone(self.poses.len()) {
            debug!(
                buffered = self.poses.len(),
                oldest = %self.poses[0].stamp,
                "pose buffer growing; no detection has matched recently"
            );
        }
    }

    /// Return the first buffered pose whose stamp equals `stamp`.
    ///
    /// On a match every pose recorded before it is discarded; the matched
    /// pose itself is kept, so resolving the same stamp again succeeds.  On a
    /// miss the buffer is left untouched.
    pub fn resolve(&mut self, stamp: Stamp) -> Option<PoseRecord> {
        let index = self.poses.iter().position(|p| p.stamp == stamp)?;
        self.poses.drain(..index);
        trace!(%stamp, pruned = index, buffered = self.poses.len(), "pose resolved");
        Some(self.poses[0])
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Stamps of the buffered poses, oldest first.
    pub fn stamps(&self) -> impl Iterator<Item = Stamp> + '_ {
        self.poses.iter().map(|p| p.stamp)
    }
}

fn is_backlog_milestone(len: usize) -> bool {
    len > 0 && len % BACKLOG_REPORT_EVERY == 0
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A pose whose world matrix translation x encodes `tag` so individual
    /// samples with equal stamps can be told apart.
    fn pose(sec: i32, tag: f64) -> PoseRecord {
        let mut world = Matrix4::identity();
        world[(0, 3)] = tag;
        PoseRecord::new(Stamp::new(sec, 0), world, Matrix4::identity())
    }

    fn tag(p: &PoseRecord) -> f64 {
        p.world_matrix[(0, 3)]
    }

    fn buffer(secs: &[i32]) -> PoseBuffer {
        let mut poses = PoseBuffer::new();
        for (i, &sec) in secs.iter().enumerate() {
            poses.record(pose(sec, i as f64));
        }
        poses
    }

    #[test]
    fn resolve_returns_first_match_and_prunes_older() {
        let mut poses = buffer(&[1, 2, 3, 2, 4]);

        let first = poses.resolve(Stamp::new(2, 0)).unwrap();
        assert_eq!(tag(&first), 1.0, "must be the first pose stamped 2");
        assert_eq!(
            poses.stamps().map(|s| s.sec).collect::<Vec<_>>(),
            vec![2, 3, 2, 4]
        );

        // The matched pose was retained, so it is still the first match.
        let again = poses.resolve(Stamp::new(2, 0)).unwrap();
        assert_eq!(tag(&again), 1.0);
        assert_eq!(poses.len(), 4);
    }

    #[test]
    fn resolve_later_stamp_prunes_through_duplicates() {
        let mut poses = buffer(&[1, 2, 3, 2, 4]);
        let p = poses.resolve(Stamp::new(4, 0)).unwrap();
        assert_eq!(tag(&p), 4.0);
        assert_eq!(poses.len(), 1);

        // Everything before t=4 is gone, including the second t=2 sample.
        assert!(poses.resolve(Stamp::new(2, 0)).is_none());
    }

    #[test]
    fn resolve_unknown_stamp_leaves_buffer_untouched() {
        let mut poses = buffer(&[1, 2, 3, 2, 4]);
        assert!(poses.resolve(Stamp::new(9, 0)).is_none());
        assert_eq!(
            poses.stamps().map(|s| s.sec).collect::<Vec<_>>(),
            vec![1, 2, 3, 2, 4]
        );
    }

    #[test]
    fn match_is_exact_on_nanoseconds() {
        let mut poses = PoseBuffer::new();
        poses.record(PoseRecord::new(
            Stamp::new(5, 100),
            Matrix4::identity(),
            Matrix4::identity(),
        ));
        assert!(poses.resolve(Stamp::new(5, 101)).is_none());
        assert!(poses.resolve(Stamp::new(5, 100)).is_some());
    }

    #[test]
    fn resolve_on_empty_buffer() {
        let mut poses = PoseBuffer::new();
        assert!(poses.is_empty());
        assert!(poses.resolve(Stamp::default()).is_none());
    }

    #[test]
    fn unmatched_poses_accumulate_and_report_backlog() {
        let mut buf = PoseBuffer::new();
        for sec in 0..130 {
            buf.record(pose(sec, 0.0));
        }
        assert_eq!(buf.len(), 130);
        assert_eq!(buf.stamps().next(), Some(Stamp::new(0, 0)));

        assert!(!is_backlog_milestone(0));
        assert!(!is_backlog_milestone(63));
        assert!(is_backlog_milestone(64));
        assert!(is_backlog_milestone(128));
    }

    #[test]
    fn from_row_major_reads_rows() {
        let mut world = [0.0; 16];
        world[3] = 7.0; // row 0, column 3
        world[4] = 2.0; // row 1, column 0
        let p = PoseRecord::from_row_major(Stamp::new(1, 0), &world, &[0.0; 16]);
        assert_eq!(p.world_matrix[(0, 3)], 7.0);
        assert_eq!(p.world_matrix[(1, 0)], 2.0);
    }

    #[test]
    fn stamp_display_pads_nanoseconds() {
        assert_eq!(Stamp::new(12, 5).to_string(), "12.000000005");
    }
}
