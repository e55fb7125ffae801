// src/actuator/link.rs - The packet transport as the proxy sees it
//
// Routing, framing and retransmission live below this trait. A proxy only needs
// to write datagrams to a named endpoint on its controller, pull a query
// response, and hear about inbound datagrams.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Endpoints exposed by the stepper firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Position/velocity target writes.
    TargetData,
    /// Query: current pos, vel, accel.
    MotionState,
    SetPosition,
    Settings,
    /// Planned segments into the embedded ring buffer.
    Queue,
    /// Inbound: u32 number of each finished segment.
    SegmentComplete,
}

/// Delivery guarantee requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Wait for the destination to acknowledge receipt.
    Acked,
    /// Fire and forget.
    Ackless,
}

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("Request to {endpoint:?} was never sent: {reason}")]
    NotSent { endpoint: Endpoint, reason: String },
    #[error("No acknowledgement from {endpoint:?} within {timeout:?}")]
    NoAck { endpoint: Endpoint, timeout: Duration },
    #[error("{endpoint:?} reported a fault: {reason}")]
    RemoteFault { endpoint: Endpoint, reason: String },
}

pub type DataHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

#[async_trait]
pub trait Link: Send + Sync {
    async fn write(&self, endpoint: Endpoint, datagram: &[u8], delivery: Delivery) -> Result<(), LinkError>;

    async fn query(&self, endpoint: Endpoint) -> Result<Vec<u8>, LinkError>;

    /// Installs the handler for datagrams arriving from `endpoint`, replacing any
    /// previous one.
    fn on_data(&self, endpoint: Endpoint, handler: DataHandler);
}
