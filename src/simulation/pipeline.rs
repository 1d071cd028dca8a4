//! Frame schedule: the ordered stages of one simulation frame together with the buffers each
//! of them reads and writes.
//!
//! A schedule is only constructed if every frame-scoped buffer is written before it is read,
//! so leaving out the per-frame reset of the counters and scan state is rejected up front.
//! Scratch buffers also remember which version of the particle arrays they were computed
//! from; reading one after a later stage has overwritten those arrays is rejected as well.
//! Between two stages that touch a common buffer (read-after-write, write-after-read or
//! write-after-write) a barrier is placed; on this substrate every dispatch retires before
//! the next one is issued, so a barrier marks a hard dependency rather than an extra wait.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    Position,
    Velocity,
    CellHash,
    CellRank,
    CellCount,
    ScanState,
    CellStart,
    SortedPosition,
    SortedVelocity,
    SortedToOriginal,
}

impl BufferId {
    /// Canonical particle arrays persist across frames; everything else is frame scratch.
    pub fn is_persistent(self) -> bool {
        matches!(self, BufferId::Position | BufferId::Velocity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ClearScratch,
    Integrate,
    HashCount,
    PrefixSum,
    Scatter,
    Collide,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::ClearScratch => "clear-scratch",
            Stage::Integrate => "integrate",
            Stage::HashCount => "hash-count",
            Stage::PrefixSum => "prefix-sum",
            Stage::Scatter => "scatter",
            Stage::Collide => "collide",
        }
    }

    pub fn reads(self) -> &'static [BufferId] {
        use BufferId::*;
        match self {
            Stage::ClearScratch => &[],
            Stage::Integrate => &[Position, Velocity],
            // the counters are incremented, so their cleared state is an input
            Stage::HashCount => &[Position, CellCount],
            Stage::PrefixSum => &[CellCount, ScanState],
            Stage::Scatter => &[Position, Velocity, CellHash, CellRank, CellStart],
            Stage::Collide => &[SortedPosition, SortedVelocity, SortedToOriginal, CellStart, CellCount],
        }
    }

    pub fn writes(self) -> &'static [BufferId] {
        use BufferId::*;
        match self {
            Stage::ClearScratch => &[CellCount, ScanState],
            Stage::Integrate => &[Position, Velocity],
            Stage::HashCount => &[CellHash, CellRank, CellCount],
            Stage::PrefixSum => &[CellStart, ScanState],
            Stage::Scatter => &[SortedPosition, SortedVelocity, SortedToOriginal],
            Stage::Collide => &[Velocity],
        }
    }

    fn conflicts_with(self, earlier: Stage) -> bool {
        let raw = self.reads().iter().any(|b| earlier.writes().contains(b));
        let war = self.writes().iter().any(|b| earlier.reads().contains(b));
        let waw = self.writes().iter().any(|b| earlier.writes().contains(b));
        raw || war || waw
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("stage '{stage}' reads {buffer:?} before any stage of the frame wrote it")]
    ReadBeforeWrite { stage: Stage, buffer: BufferId },
    #[error("stage '{stage}' reads {buffer:?}, which was computed from particle data that an earlier stage has since overwritten")]
    StaleRead { stage: Stage, buffer: BufferId },
    #[error("stage '{0}' is scheduled twice")]
    DuplicateStage(Stage),
}

#[derive(Debug, Clone)]
pub struct ScheduledStage {
    pub stage: Stage,
    /// A barrier separates this stage from the previous one.
    pub barrier_before: bool,
}

#[derive(Debug, Clone)]
pub struct FrameSchedule {
    stages: Vec<ScheduledStage>,
}

impl FrameSchedule {
    /// Clear, integrate, hash, scan, scatter, collide.
    pub fn standard() -> FrameSchedule {
        // the standard order satisfies every dependency
        match FrameSchedule::new(&[
            Stage::ClearScratch,
            Stage::Integrate,
            Stage::HashCount,
            Stage::PrefixSum,
            Stage::Scatter,
            Stage::Collide,
        ]) {
            Ok(schedule) => schedule,
            Err(e) => unreachable!("standard frame schedule is invalid: {}", e),
        }
    }

    pub fn new(order: &[Stage]) -> Result<FrameSchedule, PipelineError> {
        // write count of each persistent buffer so far
        let mut versions: HashMap<BufferId, u32> = HashMap::new();
        // for each scratch buffer written so far, the persistent versions it was derived from
        let mut derived_from: HashMap<BufferId, Vec<(BufferId, u32)>> = HashMap::new();
        let mut batch: Vec<Stage> = Vec::new();
        let mut stages = Vec::with_capacity(order.len());

        for (i, &stage) in order.iter().enumerate() {
            if order[..i].contains(&stage) {
                return Err(PipelineError::DuplicateStage(stage));
            }

            let mut inputs: Vec<(BufferId, u32)> = Vec::new();
            for &buffer in stage.reads() {
                if buffer.is_persistent() {
                    inputs.push((buffer, versions.get(&buffer).copied().unwrap_or(0)));
                    continue;
                }
                let sources = derived_from
                    .get(&buffer)
                    .ok_or(PipelineError::ReadBeforeWrite { stage, buffer })?;
                let stale = sources
                    .iter()
                    .any(|(source, version)| versions.get(source).copied().unwrap_or(0) != *version);
                if stale {
                    return Err(PipelineError::StaleRead { stage, buffer });
                }
                for source in sources {
                    if !inputs.contains(source) {
                        inputs.push(*source);
                    }
                }
            }

            for &buffer in stage.writes() {
                if buffer.is_persistent() {
                    *versions.entry(buffer).or_insert(0) += 1;
                } else {
                    derived_from.insert(buffer, inputs.clone());
                }
            }

            let barrier_before = batch.iter().any(|&earlier| stage.conflicts_with(earlier));
            if barrier_before {
                batch.clear();
            }
            batch.push(stage);

            stages.push(ScheduledStage { stage, barrier_before });
        }

        Ok(FrameSchedule { stages })
    }

    pub fn stages(&self) -> &[ScheduledStage] {
        &self.stages
    }

    /// Stages grouped into batches that share no buffer.
    pub fn batches(&self) -> Vec<Vec<Stage>> {
        let mut batches: Vec<Vec<Stage>> = Vec::new();
        for scheduled in &self.stages {
            match batches.last_mut() {
                Some(batch) if !scheduled.barrier_before => batch.push(scheduled.stage),
                _ => batches.push(vec![scheduled.stage]),
            }
        }
        batches
    }

    pub fn num_barriers(&self) -> usize {
        self.stages.iter().skip(1).filter(|s| s.barrier_before).count()
    }
}

#[test]
fn standard_schedule_batches_clear_with_integrate() {
    let schedule = FrameSchedule::standard();
    assert_eq!(
        schedule.batches(),
        vec![
            vec![Stage::ClearScratch, Stage::Integrate],
            vec![Stage::HashCount],
            vec![Stage::PrefixSum],
            vec![Stage::Scatter],
            vec![Stage::Collide],
        ]
    );
    assert_eq!(schedule.num_barriers(), 4);
}

#[test]
fn missing_reset_is_rejected() {
    let err = FrameSchedule::new(&[
        Stage::Integrate,
        Stage::HashCount,
        Stage::PrefixSum,
        Stage::Scatter,
        Stage::Collide,
    ])
    .unwrap_err();
    assert_eq!(
        err,
        PipelineError::ReadBeforeWrite {
            stage: Stage::HashCount,
            buffer: BufferId::CellCount
        }
    );
}

#[test]
fn out_of_order_stages_are_rejected() {
    let err = FrameSchedule::new(&[Stage::ClearScratch, Stage::Integrate, Stage::Scatter]).unwrap_err();
    assert_eq!(
        err,
        PipelineError::ReadBeforeWrite {
            stage: Stage::Scatter,
            buffer: BufferId::CellHash
        }
    );

    let err = FrameSchedule::new(&[Stage::ClearScratch, Stage::ClearScratch]).unwrap_err();
    assert_eq!(err, PipelineError::DuplicateStage(Stage::ClearScratch));
}

#[test]
fn integrate_only_schedule_needs_no_scratch() {
    let schedule = FrameSchedule::new(&[Stage::Integrate]).unwrap();
    assert_eq!(schedule.num_barriers(), 0);
}

#[test]
fn hashing_before_integration_is_rejected() {
    let err = FrameSchedule::new(&[
        Stage::ClearScratch,
        Stage::HashCount,
        Stage::Integrate,
        Stage::PrefixSum,
        Stage::Scatter,
        Stage::Collide,
    ])
    .unwrap_err();
    assert_eq!(
        err,
        PipelineError::StaleRead {
            stage: Stage::PrefixSum,
            buffer: BufferId::CellCount
        }
    );
}

#[test]
fn integrating_between_scatter_and_collide_is_rejected() {
    let err = FrameSchedule::new(&[
        Stage::ClearScratch,
        Stage::HashCount,
        Stage::PrefixSum,
        Stage::Scatter,
        Stage::Integrate,
        Stage::Collide,
    ])
    .unwrap_err();
    assert_eq!(
        err,
        PipelineError::StaleRead {
            stage: Stage::Collide,
            buffer: BufferId::SortedPosition
        }
    );
}
