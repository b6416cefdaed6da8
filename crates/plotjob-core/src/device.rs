//! Plotter device abstraction and the single-device arbiter.
//!
//! The real actuator driver is an external collaborator; this module only
//! defines the seam the FSM drives it through, a no-op driver for setups
//! without hardware attached, and a recording mock for tests.

use std::sync::Mutex;
use thiserror::Error;

use crate::guards::DeviceStatus;
use crate::job::JobRecord;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Device fault: {0}")]
    Fault(String),

    /// The single physical device is already leased to another job.
    #[error("Device busy: leased to {0}")]
    Busy(String),
}

/// Seam between the FSM and the physical actuator. Implementations wrap
/// whatever serial/USB protocol the plotter speaks.
pub trait PlotterDriver: Send + Sync {
    /// Establish the connection. Idempotent.
    fn connect(&self) -> Result<(), DeviceError>;

    /// Lift the pen. Safe to call at any time.
    fn pen_up(&self) -> Result<(), DeviceError>;

    fn pen_down(&self) -> Result<(), DeviceError>;

    /// Begin physical motion for a job.
    fn begin(&self, job: &JobRecord) -> Result<(), DeviceError>;

    /// Stop physical motion immediately (pen up, motors halted). Called
    /// before any abort bookkeeping so the hardware stops first.
    fn halt(&self) -> Result<(), DeviceError>;

    /// Current connection state as observed by the driver.
    fn status(&self) -> DeviceStatus;
}

/// Driver used when no hardware is attached; logs every primitive.
pub struct NullDriver;

impl PlotterDriver for NullDriver {
    fn connect(&self) -> Result<(), DeviceError> {
        tracing::debug!("null driver: connect");
        Ok(())
    }

    fn pen_up(&self) -> Result<(), DeviceError> {
        tracing::debug!("null driver: pen up");
        Ok(())
    }

    fn pen_down(&self) -> Result<(), DeviceError> {
        tracing::debug!("null driver: pen down");
        Ok(())
    }

    fn begin(&self, job: &JobRecord) -> Result<(), DeviceError> {
        tracing::debug!(job_id = %job.id, "null driver: begin");
        Ok(())
    }

    fn halt(&self) -> Result<(), DeviceError> {
        tracing::debug!("null driver: halt");
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus::Connected
    }
}

/// Test driver recording every primitive, with failure injection.
#[derive(Default)]
pub struct MockDriver {
    ops: Mutex<Vec<String>>,
    fail_next: Mutex<Option<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every primitive the driver has executed, in order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Make the next primitive fail with the given message.
    pub fn fail_next(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(message.into());
        }
    }

    fn record(&self, op: &str) -> Result<(), DeviceError> {
        if let Ok(mut slot) = self.fail_next.lock() {
            if let Some(message) = slot.take() {
                return Err(DeviceError::Fault(message));
            }
        }
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op.to_string());
        }
        Ok(())
    }
}

impl PlotterDriver for MockDriver {
    fn connect(&self) -> Result<(), DeviceError> {
        self.record("connect")
    }

    fn pen_up(&self) -> Result<(), DeviceError> {
        self.record("pen_up")
    }

    fn pen_down(&self) -> Result<(), DeviceError> {
        self.record("pen_down")
    }

    fn begin(&self, job: &JobRecord) -> Result<(), DeviceError> {
        self.record(&format!("begin:{}", job.id))
    }

    fn halt(&self) -> Result<(), DeviceError> {
        self.record("halt")
    }

    fn status(&self) -> DeviceStatus {
        let connected = self
            .ops
            .lock()
            .map(|ops| ops.iter().any(|op| op == "connect"))
            .unwrap_or(false);
        if connected {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Unknown
        }
    }
}

/// Enforces that at most one job holds the physical device. Acquired
/// before entering PLOTTING, released on every exit from it.
pub struct DeviceArbiter {
    holder: Mutex<Option<String>>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self {
            holder: Mutex::new(None),
        }
    }

    /// Lease the device to a job. Re-acquiring for the current holder is
    /// fine (resume after the process restarted mid-lease).
    pub fn acquire(&self, job_id: &str) -> Result<(), DeviceError> {
        let mut holder = self
            .holder
            .lock()
            .map_err(|_| DeviceError::Fault("arbiter lock poisoned".into()))?;
        match holder.as_deref() {
            Some(current) if current != job_id => Err(DeviceError::Busy(current.to_string())),
            _ => {
                *holder = Some(job_id.to_string());
                Ok(())
            }
        }
    }

    /// Release the lease if this job holds it.
    pub fn release(&self, job_id: &str) {
        if let Ok(mut holder) = self.holder.lock() {
            if holder.as_deref() == Some(job_id) {
                *holder = None;
            }
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }
}

impl Default for DeviceArbiter {
    fn default() -> Self {
        Self::new()
    }
}
