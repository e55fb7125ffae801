// src/sim/link.rs - In-process Link to a simulated controller
use super::controller::SimController;
use crate::actuator::link::{DataHandler, Delivery, Endpoint, Link, LinkError};
use crate::actuator::wire;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Faults the link can be told to inject.
#[derive(Debug, Clone)]
pub struct SimFaults {
    /// Fail every request before it leaves.
    pub refuse_sends: bool,
    /// Deliver writes but never acknowledge them; queries go unanswered.
    pub drop_acks: bool,
    /// Reply to every request with this fault.
    pub remote_fault: Option<String>,
    /// Swallow segment-complete notifications.
    pub drop_completions: bool,
    /// How long a request waits before giving up on its acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for SimFaults {
    fn default() -> Self {
        Self {
            refuse_sends: false,
            drop_acks: false,
            remote_fault: None,
            drop_completions: false,
            ack_timeout: Duration::from_millis(250),
        }
    }
}

struct Shared {
    name: String,
    controller: Mutex<SimController>,
    completions: Mutex<Option<DataHandler>>,
    faults: Mutex<SimFaults>,
    latency: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to a simulated controller. Clones share the same controller.
///
/// The controller is integrated by a background task that lives as long as
/// any clone of the link.
#[derive(Clone)]
pub struct SimLink {
    shared: Arc<Shared>,
}

impl SimLink {
    /// Starts a controller for `axis` ticking every `tick`. Must be called from
    /// within a tokio runtime.
    pub fn spawn(name: impl Into<String>, axis: usize, spu: f64, tick: Duration) -> Self {
        Self::with_latency(name, axis, spu, tick, Duration::ZERO)
    }

    pub fn with_latency(
        name: impl Into<String>,
        axis: usize,
        spu: f64,
        tick: Duration,
        latency: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            controller: Mutex::new(SimController::new(axis, spu)),
            completions: Mutex::new(None),
            faults: Mutex::new(SimFaults::default()),
            latency,
        });
        tokio::spawn(run_controller(Arc::downgrade(&shared), tick));
        Self { shared }
    }

    pub fn set_faults(&self, faults: SimFaults) {
        *lock(&self.shared.faults) = faults;
    }

    pub fn faults(&self) -> SimFaults {
        lock(&self.shared.faults).clone()
    }

    /// Snapshot of the simulated controller.
    pub fn controller(&self) -> SimController {
        lock(&self.shared.controller).clone()
    }

    async fn delay(&self) {
        if !self.shared.latency.is_zero() {
            tokio::time::sleep(self.shared.latency).await;
        }
    }

    /// Checks the faults that apply before anything reaches the controller.
    fn precheck(&self, endpoint: Endpoint) -> Result<SimFaults, LinkError> {
        let faults = self.faults();
        if faults.refuse_sends {
            return Err(LinkError::NotSent {
                endpoint,
                reason: format!("{}: route unavailable", self.shared.name),
            });
        }
        if let Some(reason) = &faults.remote_fault {
            return Err(LinkError::RemoteFault {
                endpoint,
                reason: reason.clone(),
            });
        }
        Ok(faults)
    }
}

async fn run_controller(weak: Weak<Shared>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let dt = tick.as_secs_f64();
    loop {
        interval.tick().await;
        let Some(shared) = weak.upgrade() else {
            break;
        };
        let completed = lock(&shared.controller).tick(dt);
        if completed.is_empty() || lock(&shared.faults).drop_completions {
            continue;
        }
        if let Some(handler) = lock(&shared.completions).as_ref() {
            for number in completed {
                handler(&wire::encode_segment_complete(number));
            }
        }
    }
}

#[async_trait]
impl Link for SimLink {
    async fn write(&self, endpoint: Endpoint, datagram: &[u8], delivery: Delivery) -> Result<(), LinkError> {
        self.delay().await;
        let faults = self.precheck(endpoint)?;
        lock(&self.shared.controller)
            .handle_write(endpoint, datagram)
            .map_err(|reason| LinkError::RemoteFault { endpoint, reason })?;
        if delivery == Delivery::Acked && faults.drop_acks {
            tokio::time::sleep(faults.ack_timeout).await;
            return Err(LinkError::NoAck {
                endpoint,
                timeout: faults.ack_timeout,
            });
        }
        Ok(())
    }

    async fn query(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError> {
        self.delay().await;
        let faults = self.precheck(endpoint)?;
        if faults.drop_acks {
            tokio::time::sleep(faults.ack_timeout).await;
            return Err(LinkError::NoAck {
                endpoint,
                timeout: faults.ack_timeout,
            });
        }
        let response = lock(&self.shared.controller)
            .handle_query(endpoint)
            .map_err(|reason| LinkError::RemoteFault { endpoint, reason })?;
        Ok(response)
    }

    fn on_data(&self, endpoint: Endpoint, handler: DataHandler) {
        if endpoint == Endpoint::SegmentComplete {
            *lock(&self.shared.completions) = Some(handler);
        } else {
            tracing::warn!("{}: no inbound traffic on {:?}", self.shared.name, endpoint);
        }
    }
}
