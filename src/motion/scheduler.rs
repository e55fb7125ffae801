// src/motion/scheduler.rs - Task that owns the segment queue
//
// Every queue mutation happens on this task: coordinator requests arrive on an
// mpsc channel with a oneshot for the reply, completions arrive on their own
// channel fed by the actuators' sinks.

use super::MotionError;
use super::fanout::fan_out;
use super::queue::{AckOutcome, HaltReason, QueueAction, QueueEvent, QueueState, QueueStats, SegmentPlan, SegmentQueue};
use crate::actuator::{Actuator, SegmentComplete};
use crate::config::CoordinatorConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug)]
pub enum SchedulerRequest {
    /// Append a segment. Replies with its number.
    Enqueue {
        plan: SegmentPlan,
        respond_to: oneshot::Sender<Result<u32, MotionError>>,
    },
    /// Halt with `reason` unless the queue is empty. Replies whether the
    /// queue is halted afterwards; an earlier reason is kept.
    Halt {
        reason: HaltReason,
        respond_to: oneshot::Sender<bool>,
    },
    /// Leave the halted state, abandoning whatever is still in flight.
    /// Replies whether the queue was halted.
    Resume {
        respond_to: oneshot::Sender<bool>,
    },
    Stats {
        respond_to: oneshot::Sender<QueueStats>,
    },
    /// Reply once the queue is empty, or with an error once it halts.
    Drain {
        respond_to: oneshot::Sender<Result<(), MotionError>>,
    },
}

/// Cloneable front end of the scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerRequest>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerRequest,
    ) -> Result<T, MotionError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(build(respond_to))
            .await
            .map_err(|_| MotionError::SchedulerClosed)?;
        rx.await.map_err(|_| MotionError::SchedulerClosed)
    }

    pub async fn enqueue(&self, plan: SegmentPlan) -> Result<u32, MotionError> {
        self.request(|respond_to| SchedulerRequest::Enqueue { plan, respond_to })
            .await?
    }

    pub async fn halt(&self, reason: HaltReason) -> Result<bool, MotionError> {
        self.request(|respond_to| SchedulerRequest::Halt { reason, respond_to })
            .await
    }

    pub async fn resume(&self) -> Result<bool, MotionError> {
        self.request(|respond_to| SchedulerRequest::Resume { respond_to }).await
    }

    pub async fn stats(&self) -> Result<QueueStats, MotionError> {
        self.request(|respond_to| SchedulerRequest::Stats { respond_to }).await
    }

    pub async fn drain(&self) -> Result<(), MotionError> {
        self.request(|respond_to| SchedulerRequest::Drain { respond_to })
            .await?
    }
}

pub struct Scheduler<A: Actuator + ?Sized> {
    queue: SegmentQueue,
    actuators: Vec<Arc<A>>,
    requests: mpsc::Receiver<SchedulerRequest>,
    completions: mpsc::UnboundedReceiver<SegmentComplete>,
    start_delay: Duration,
    ack_timeout: Option<Duration>,
    start_at: Option<Instant>,
    drain_waiters: Vec<oneshot::Sender<Result<(), MotionError>>>,
}

/// Spawns the scheduler on the current runtime.
pub fn spawn_scheduler<A: Actuator + ?Sized + 'static>(
    actuators: Vec<Arc<A>>,
    completions: mpsc::UnboundedReceiver<SegmentComplete>,
    config: &CoordinatorConfig,
) -> SchedulerHandle {
    let (tx, requests) = mpsc::channel(64);
    let scheduler = Scheduler {
        queue: SegmentQueue::new(actuators.len(), config.remote_window),
        actuators,
        requests,
        completions,
        start_delay: config.queue_start_delay(),
        ack_timeout: config.ack_timeout(),
        start_at: None,
        drain_waiters: Vec::new(),
    };
    tokio::spawn(scheduler.run());
    SchedulerHandle { tx }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<A: Actuator + ?Sized + 'static> Scheduler<A> {
    pub async fn run(mut self) {
        tracing::debug!("Segment scheduler started for {} actuators", self.actuators.len());
        loop {
            // only a running queue can be waiting on completions
            let ack_deadline = match (self.queue.state(), self.ack_timeout) {
                (QueueState::Running, Some(timeout)) => self.queue.ack_deadline(timeout),
                _ => None,
            };
            tokio::select! {
                biased;
                Some(done) = self.completions.recv() => self.on_complete(done).await,
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                _ = wait_until(self.start_at) => {
                    self.start_at = None;
                    let action = self.queue.transition(QueueEvent::StartTimerFired);
                    self.apply(action).await;
                }
                _ = wait_until(ack_deadline) => self.on_ack_deadline(),
            }
            self.settle_drains();
        }
        tracing::debug!("Segment scheduler shutting down");
    }

    async fn handle(&mut self, request: SchedulerRequest) {
        match request {
            SchedulerRequest::Enqueue { plan, respond_to } => {
                let result = match self.queue.enqueue(plan) {
                    Ok((number, action)) => {
                        self.apply(action).await;
                        // the transmission this enqueue triggered may have halted us
                        match self.queue.state() {
                            QueueState::Halted(reason) => Err(MotionError::QueueHalted(reason.clone())),
                            _ => Ok(number),
                        }
                    }
                    Err(reason) => Err(MotionError::QueueHalted(reason)),
                };
                let _ = respond_to.send(result);
            }
            SchedulerRequest::Halt { reason, respond_to } => {
                let halted = !matches!(self.queue.state(), QueueState::Empty);
                if halted {
                    self.halt(reason);
                }
                let _ = respond_to.send(halted);
            }
            SchedulerRequest::Resume { respond_to } => {
                let was_halted = matches!(self.queue.state(), QueueState::Halted(_));
                self.queue.transition(QueueEvent::Resume);
                let _ = respond_to.send(was_halted);
            }
            SchedulerRequest::Stats { respond_to } => {
                let _ = respond_to.send(self.queue.stats());
            }
            SchedulerRequest::Drain { respond_to } => {
                self.drain_waiters.push(respond_to);
            }
        }
    }

    async fn apply(&mut self, action: QueueAction) {
        match action {
            QueueAction::None => {}
            QueueAction::ArmStartTimer => {
                self.start_at = Some(Instant::now() + self.start_delay);
                tracing::debug!("Queue start in {:?}", self.start_delay);
            }
            QueueAction::Transmit => self.transmit().await,
        }
    }

    async fn transmit(&mut self) {
        let payloads = self.queue.next_transmissions(Instant::now());
        for payload in payloads {
            let segment = Arc::new(payload);
            let sent = fan_out(&self.actuators, |_, actuator| {
                let segment = Arc::clone(&segment);
                async move { actuator.transmit_planned_segment(&segment).await }
            })
            .await;
            if let Err(e) = sent {
                let detail = e
                    .failures
                    .iter()
                    .map(|f| format!("actuator {}: {}", f.actuator, f.error))
                    .collect::<Vec<_>>()
                    .join("; ");
                tracing::error!("Segment {} transmission failed: {}", segment.segment_number, detail);
                self.queue.revoke_transmission(segment.segment_number);
                self.halt(HaltReason::TransmitFailed {
                    segment: segment.segment_number,
                    detail,
                });
                return;
            }
            tracing::debug!(
                "Segment {} sent to {} actuators{}",
                segment.segment_number,
                self.actuators.len(),
                if segment.is_last { " (last)" } else { "" }
            );
        }
    }

    async fn on_complete(&mut self, done: SegmentComplete) {
        if self.queue.acknowledge(done.actuator, done.segment_number) == AckOutcome::Retired {
            self.queue.mark_progress(Instant::now());
            let action = self.queue.transition(QueueEvent::Retired);
            self.apply(action).await;
        }
    }

    fn on_ack_deadline(&mut self) {
        let Some(timeout) = self.ack_timeout else {
            return;
        };
        if let Some(reason) = self.queue.overdue(Instant::now(), timeout) {
            tracing::error!("{}", reason);
            self.halt(reason);
        }
    }

    fn halt(&mut self, reason: HaltReason) {
        self.start_at = None;
        self.queue.transition(QueueEvent::Halt(reason));
    }

    fn settle_drains(&mut self) {
        if self.drain_waiters.is_empty() {
            return;
        }
        let outcome = match self.queue.state() {
            QueueState::Empty => Ok(()),
            QueueState::Halted(reason) => Err(reason.clone()),
            _ => return,
        };
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(outcome.clone().map_err(MotionError::QueueHalted));
        }
    }
}
