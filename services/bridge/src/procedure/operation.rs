//! services/bridge/src/procedure/operation.rs
//!
//! A long-running tool movement. The pose at any instant is computed from the
//! elapsed time since the start, never accumulated tick by tick, so a late or
//! skipped tick cannot make the tool drift.

use neuro_surgery_core::{OperationRequest, Pose};
use tokio::time::Instant;

/// Why an operation could not be started.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OperationError {
    /// A speed that would never finish the movement.
    #[error("movement speed must be a positive number, got {0}")]
    InvalidSpeed(f64),
}

/// Where an operation stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub pose: Pose,
    /// Share of the total distance covered, in `[0, 1]`.
    pub fraction: f64,
    pub finished: bool,
}

/// The single in-flight movement.
#[derive(Debug, Clone)]
pub struct Operation {
    request: OperationRequest,
    start: Pose,
    started_at: Instant,
    total_distance: f64,
}

impl Operation {
    pub fn start(
        request: OperationRequest,
        start: Pose,
        now: Instant,
    ) -> Result<Self, OperationError> {
        if !request.speed.is_finite() || request.speed <= 0.0 {
            return Err(OperationError::InvalidSpeed(request.speed));
        }

        let total_distance = if request.kind.is_angular() {
            start.orientation.angle_to(request.target.orientation)
        } else {
            start.position.distance(request.target.position)
        };

        Ok(Self {
            request,
            start,
            started_at: now,
            total_distance,
        })
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn tool(&self) -> &str {
        &self.request.tool
    }

    /// Millimeters, or degrees for rotations.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Computes the pose at `now`.
    ///
    /// Orientation uses a normalized lerp recomputed from the start each
    /// call. Once the covered distance reaches the total, the exact target pose
    /// is returned.
    pub fn sample(&self, now: Instant) -> Progress {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let covered = self.request.speed * elapsed;

        if covered >= self.total_distance {
            return Progress {
                pose: self.request.target,
                fraction: 1.0,
                finished: true,
            };
        }

        let fraction = covered / self.total_distance;
        let target = &self.request.target;
        Progress {
            pose: Pose::new(
                self.start.position.lerp(target.position, fraction),
                self.start.orientation.nlerp(target.orientation, fraction),
            ),
            fraction,
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuro_surgery_core::{MovementKind, Quat, Vec3};
    use std::time::Duration;

    fn request(kind: MovementKind, target: Pose, speed: f64) -> OperationRequest {
        OperationRequest {
            tool: "drill".to_string(),
            kind,
            target,
            speed,
        }
    }

    #[test]
    fn translation_is_linear_in_elapsed_time() {
        let now = Instant::now();
        let target = Pose::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);
        let op = Operation::start(request(MovementKind::Translate, target, 5.0), Pose::default(), now)
            .unwrap();
        assert_eq!(op.total_distance(), 10.0);

        let halfway = op.sample(now + Duration::from_secs(1));
        assert!(!halfway.finished);
        assert!((halfway.pose.position.x - 5.0).abs() < 1e-9);
        assert!((halfway.fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn finishing_snaps_to_the_exact_target() {
        let now = Instant::now();
        let target = Pose::new(Vec3::new(1.0 / 3.0, 2.0 / 3.0, -7.1), Quat::IDENTITY);
        let op = Operation::start(request(MovementKind::Insert, target, 3.0), Pose::default(), now)
            .unwrap();
        let done = op.sample(now + Duration::from_secs(60));
        assert!(done.finished);
        assert_eq!(done.pose, target);
    }

    #[test]
    fn rotation_progress_is_measured_in_degrees() {
        let now = Instant::now();
        let target = Pose::new(Vec3::ZERO, Quat::from_axis_angle(Vec3::X, 90.0));
        let op = Operation::start(request(MovementKind::Rotate, target, 30.0), Pose::default(), now)
            .unwrap();
        assert!((op.total_distance() - 90.0).abs() < 1e-6);

        let partial = op.sample(now + Duration::from_secs(1));
        assert!(!partial.finished);
        assert!((partial.pose.orientation.norm() - 1.0).abs() < 1e-9);
        assert!(op.sample(now + Duration::from_secs(3)).finished);
    }

    #[test]
    fn zero_distance_finishes_immediately() {
        let now = Instant::now();
        let op = Operation::start(
            request(MovementKind::Translate, Pose::default(), 1.0),
            Pose::default(),
            now,
        )
        .unwrap();
        assert!(op.sample(now).finished);
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let now = Instant::now();
        for speed in [0.0, -2.0, f64::NAN] {
            let result = Operation::start(
                request(MovementKind::Translate, Pose::default(), speed),
                Pose::default(),
                now,
            );
            assert!(result.is_err());
        }
    }
}
