use glam::Mat4;
use tracing::debug;

use super::{
    JOINT_COUNT,
    kinematic_tree::{JointError, KinematicTree},
    pose::{AngleUnits, IngestError, PoseIngestor, PoseSample, RejectedReason, check_newer},
};

/// Receives the composed pose once per tick. Implementors only read the transforms.
pub trait PoseRenderer {
    /// `changed` is false when no joint moved since the previous draw.
    fn draw(&mut self, world: &[Mat4; JOINT_COUNT], changed: bool);
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TelemetryStats {
    /// Samples that made it onto the tree.
    pub applied: u64,
    /// Queued samples replaced by a newer one before a tick picked them up.
    pub superseded: u64,
    pub decode_failures: u64,
    pub not_ready: u64,
    pub stale: u64,
}

impl std::fmt::Display for TelemetryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "applied: {}, superseded: {}, decode failures: {}, not ready: {}, stale: {}",
            self.applied, self.superseded, self.decode_failures, self.not_ready, self.stale
        )
    }
}

/// Holds at most one validated sample between ticks. A newer sample replaces the queued one.
pub struct UpdateScheduler {
    ingestor: PoseIngestor,
    pending: Option<PoseSample>,
    stats: TelemetryStats,
}

impl UpdateScheduler {
    pub fn new(units: AngleUnits) -> Self {
        Self {
            ingestor: PoseIngestor::new(units),
            pending: None,
            stats: TelemetryStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> &TelemetryStats {
        &self.stats
    }

    #[inline]
    pub fn pending(&self) -> Option<&PoseSample> {
        self.pending.as_ref()
    }

    #[inline]
    pub fn last_applied(&self) -> Option<u64> {
        self.ingestor.last_applied()
    }

    /// Decode and validate one inbound message and queue it for the next tick. Dropped messages
    /// are counted and reported back, but never touch the tree.
    pub fn on_telemetry(
        &mut self,
        payload: &[u8],
        sequence: u64,
        tree: Option<&KinematicTree>,
    ) -> Result<(), IngestError> {
        let result = self.queue(payload, sequence, tree);

        match &result {
            Ok(()) => {}
            Err(IngestError::Decode(err)) => {
                self.stats.decode_failures += 1;
                debug!("Dropping telemetry {sequence}: {err}");
            }
            Err(IngestError::Rejected(reason)) => {
                match reason {
                    RejectedReason::NotReady => self.stats.not_ready += 1,
                    RejectedReason::Stale { .. } => self.stats.stale += 1,
                }
                debug!("Dropping telemetry {sequence}: {reason}");
            }
        }

        result
    }

    fn queue(
        &mut self,
        payload: &[u8],
        sequence: u64,
        tree: Option<&KinematicTree>,
    ) -> Result<(), IngestError> {
        let sample = self.ingestor.decode(payload, sequence)?;
        self.ingestor.validate(&sample, tree)?;

        // Also stale if it does not beat the sample already waiting for the tick.
        if let Some(pending) = &self.pending {
            check_newer(sample.sequence, Some(pending.sequence))?;
            self.stats.superseded += 1;
        }

        self.pending = Some(sample);

        Ok(())
    }

    /// One render tick: apply the pending sample if there is one, compose every joint and hand
    /// the result to the renderer. The pose is redrawn even when nothing changed.
    ///
    /// Returns `true` if a sample was applied.
    pub fn tick(
        &mut self,
        tree: &mut KinematicTree,
        renderer: &mut impl PoseRenderer,
    ) -> Result<bool, JointError> {
        let applied = match self.pending.take() {
            Some(sample) => {
                self.ingestor.apply(&sample, tree)?;
                self.stats.applied += 1;
                true
            }
            None => false,
        };

        let changed = tree.is_dirty();
        let world = tree.compose_all();
        renderer.draw(&world, changed);

        Ok(applied)
    }
}
