// src/motion/queue.rs - Planned segment queue and its state machine
//
// Pure bookkeeping: no timers, no I/O. The scheduler task owns one of these and
// turns the returned actions into timers and transmissions.

use crate::actuator::{MAX_DOF, SegmentPayload};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Why the queue stopped transmitting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HaltReason {
    #[error("Stopped by request")]
    Stopped,
    /// A direct command took the actuators out of queue mode, which empties
    /// their embedded queues.
    #[error("Preempted by a direct {operation} command")]
    Preempted { operation: &'static str },
    #[error("Transmission of segment {segment} failed: {detail}")]
    TransmitFailed { segment: u32, detail: String },
    #[error("Segment {segment} not completed by actuators {missing:?} within {timeout:?}")]
    AckTimeout {
        segment: u32,
        missing: Vec<usize>,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueState {
    Empty,
    /// Buffering segments until the start delay expires.
    AwaitingStart,
    Running,
    /// No transmissions until resumed.
    Halted(HaltReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued,
    StartTimerFired,
    Retired,
    Halt(HaltReason),
    Resume,
}

/// What the owner of the queue has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    None,
    ArmStartTimer,
    /// Run the window scan and send whatever it returns.
    Transmit,
}

/// Geometry and velocity profile of one queued move.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub unit: [f64; MAX_DOF],
    pub vi: f64,
    pub vmax: f64,
    pub vf: f64,
    pub accel: f64,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub segment_number: u32,
    pub plan: SegmentPlan,
    pub is_last: bool,
    /// Set once the segment went out to every actuator.
    pub transmit_time: Option<Instant>,
    /// Actuators that still owe a completion.
    pub ack_set: BTreeSet<usize>,
}

impl PlannedSegment {
    pub fn is_transmitted(&self) -> bool {
        self.transmit_time.is_some()
    }

    pub fn payload(&self) -> SegmentPayload {
        SegmentPayload {
            segment_number: self.segment_number,
            is_last: self.is_last,
            unit: self.plan.unit,
            vi: self.plan.vi,
            accel: self.plan.accel,
            vmax: self.plan.vmax,
            vf: self.plan.vf,
            distance: self.plan.distance,
        }
    }
}

/// Result of reconciling one segment-complete notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Accepted; other actuators still owe this segment.
    Pending,
    /// Last outstanding completion; the segment left the queue.
    Retired,
    /// Unknown, retired, untransmitted, duplicate or from a non-member.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub length: usize,
    pub in_flight: usize,
    /// Number the next enqueued segment will get.
    pub next_segment: u32,
    pub retired: u64,
    pub ignored_acks: u64,
    pub state: QueueState,
}

pub struct SegmentQueue {
    entries: VecDeque<PlannedSegment>,
    state: QueueState,
    actuator_count: usize,
    remote_window: usize,
    next_segment: u32,
    retired: u64,
    ignored_acks: u64,
    /// Last time a segment retired; the head of the queue cannot finish
    /// before its predecessors did.
    progress_at: Option<Instant>,
}

impl SegmentQueue {
    pub fn new(actuator_count: usize, remote_window: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            state: QueueState::Empty,
            actuator_count,
            remote_window,
            next_segment: 0,
            retired: 0,
            ignored_acks: 0,
            progress_at: None,
        }
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.entries.iter().filter(|s| s.is_transmitted()).count()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PlannedSegment> {
        self.entries.iter()
    }

    /// Appends a segment and returns its number together with the action the
    /// enqueue triggers.
    pub fn enqueue(&mut self, plan: SegmentPlan) -> Result<(u32, QueueAction), HaltReason> {
        if let QueueState::Halted(reason) = &self.state {
            return Err(reason.clone());
        }
        let segment_number = self.next_segment;
        self.next_segment = self.next_segment.wrapping_add(1);
        self.entries.push_back(PlannedSegment {
            segment_number,
            plan,
            is_last: false,
            transmit_time: None,
            ack_set: BTreeSet::new(),
        });
        tracing::debug!("Queued segment {} ({} pending)", segment_number, self.entries.len());
        Ok((segment_number, self.transition(QueueEvent::Enqueued)))
    }

    pub fn transition(&mut self, event: QueueEvent) -> QueueAction {
        if let QueueState::Halted(_) = self.state {
            if event == QueueEvent::Resume {
                let abandoned = self.entries.len();
                self.entries.clear();
                self.progress_at = None;
                self.state = QueueState::Empty;
                tracing::info!("Segment queue resumed, {} in-flight segments abandoned", abandoned);
            }
            return QueueAction::None;
        }
        match event {
            QueueEvent::Halt(reason) => {
                let before = self.entries.len();
                self.entries.retain(|s| s.is_transmitted());
                tracing::info!(
                    "Segment queue halted ({}), {} untransmitted segments purged",
                    reason,
                    before - self.entries.len()
                );
                self.state = QueueState::Halted(reason);
                QueueAction::None
            }
            QueueEvent::Enqueued if self.state == QueueState::Empty => {
                self.state = QueueState::AwaitingStart;
                QueueAction::ArmStartTimer
            }
            QueueEvent::StartTimerFired if self.state == QueueState::AwaitingStart => {
                tracing::info!("Segment queue running with {} buffered", self.entries.len());
                self.state = QueueState::Running;
                self.check_running()
            }
            QueueEvent::Enqueued | QueueEvent::Retired if self.state == QueueState::Running => {
                self.check_running()
            }
            _ => QueueAction::None,
        }
    }

    fn check_running(&mut self) -> QueueAction {
        if self.entries.is_empty() {
            tracing::debug!("Segment queue drained");
            self.state = QueueState::Empty;
            QueueAction::None
        } else {
            QueueAction::Transmit
        }
    }

    /// Stamps every untransmitted segment inside the window and returns their
    /// payloads. Only the first `remote_window - 1` entries are eligible, which
    /// bounds how many segments can be in flight.
    pub fn next_transmissions(&mut self, now: Instant) -> Vec<SegmentPayload> {
        if self.state != QueueState::Running {
            return Vec::new();
        }
        let len = self.entries.len();
        let span = len.min(self.remote_window.saturating_sub(1));
        let mut out = Vec::new();
        for (i, segment) in self.entries.iter_mut().take(span).enumerate() {
            if segment.is_transmitted() {
                continue;
            }
            segment.transmit_time = Some(now);
            segment.ack_set = (0..self.actuator_count).collect();
            segment.is_last = i + 1 == len;
            out.push(segment.payload());
        }
        out
    }

    /// Takes back the stamp of `segment_number` and of every segment behind it,
    /// for a batch that could not be sent completely.
    pub fn revoke_transmission(&mut self, segment_number: u32) {
        let Some(index) = self
            .entries
            .iter()
            .position(|s| s.segment_number == segment_number)
        else {
            return;
        };
        for segment in self.entries.iter_mut().skip(index) {
            segment.transmit_time = None;
            segment.ack_set.clear();
        }
    }

    pub fn acknowledge(&mut self, actuator: usize, segment_number: u32) -> AckOutcome {
        let Some(index) = self
            .entries
            .iter()
            .position(|s| s.segment_number == segment_number)
        else {
            return self.ignore(actuator, segment_number, "unknown or already retired");
        };
        let segment = &mut self.entries[index];
        if !segment.is_transmitted() {
            return self.ignore(actuator, segment_number, "not transmitted yet");
        }
        if !segment.ack_set.remove(&actuator) {
            return self.ignore(actuator, segment_number, "duplicate or not a member");
        }
        if !segment.ack_set.is_empty() {
            return AckOutcome::Pending;
        }
        self.entries.remove(index);
        self.retired += 1;
        tracing::debug!("Segment {} retired", segment_number);
        AckOutcome::Retired
    }

    fn ignore(&mut self, actuator: usize, segment_number: u32, why: &str) -> AckOutcome {
        self.ignored_acks += 1;
        tracing::warn!(
            "Ignoring completion of segment {} from actuator {}: {}",
            segment_number, actuator, why
        );
        AckOutcome::Ignored
    }

    /// Records that a segment retired at `now`.
    pub fn mark_progress(&mut self, now: Instant) {
        self.progress_at = Some(now);
    }

    pub fn oldest_in_flight(&self) -> Option<&PlannedSegment> {
        self.entries
            .iter()
            .filter(|s| s.is_transmitted())
            .min_by_key(|s| s.transmit_time)
    }

    /// Since when the oldest in-flight segment has been waiting: its
    /// transmission, or the last retirement if that came later.
    fn waiting_since(&self) -> Option<(&PlannedSegment, Instant)> {
        let oldest = self.oldest_in_flight()?;
        let sent = oldest.transmit_time?;
        let since = match self.progress_at {
            Some(progress) if progress > sent => progress,
            _ => sent,
        };
        Some((oldest, since))
    }

    /// When the oldest in-flight segment runs out of time.
    pub fn ack_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.waiting_since().map(|(_, since)| since + timeout)
    }

    /// The halt reason, if the oldest in-flight segment is overdue at `now`.
    pub fn overdue(&self, now: Instant, timeout: Duration) -> Option<HaltReason> {
        let (oldest, since) = self.waiting_since()?;
        if now < since + timeout {
            return None;
        }
        Some(HaltReason::AckTimeout {
            segment: oldest.segment_number,
            missing: oldest.ack_set.iter().copied().collect(),
            timeout,
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            length: self.entries.len(),
            in_flight: self.in_flight(),
            next_segment: self.next_segment,
            retired: self.retired,
            ignored_acks: self.ignored_acks,
            state: self.state.clone(),
        }
    }
}
