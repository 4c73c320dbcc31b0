//! Controller events
//!
//! Events are the operator-visible record of what the control loop did.
//! Parked events report claims and volumes that stopped being retried.

use crate::ClaimKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all controller events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Identity of the controller instance that emitted the event
    pub actor: String,

    /// The actual event
    pub event: ControllerEvent,
}

impl ControllerEventEnvelope {
    pub fn new(event: ControllerEvent, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: event.severity(),
            actor: actor.into(),
            event,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Controller events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControllerEvent {
    ProvisioningSucceeded {
        claim: ClaimKey,
        volume: String,
    },

    ProvisioningNotReady {
        claim: ClaimKey,
        reason: String,
    },

    ProvisioningFailed {
        claim: ClaimKey,
        attempt: u32,
        reason: String,
    },

    /// Failure threshold reached; no further automatic retries
    ProvisioningParked {
        claim: ClaimKey,
        attempts: u32,
        last_failure: chrono::DateTime<chrono::Utc>,
        reason: String,
    },

    DeletionSucceeded {
        volume: String,
    },

    /// Volume is owned by another instance
    DeletionSkipped {
        volume: String,
        reason: String,
    },

    DeletionFailed {
        volume: String,
        attempt: u32,
        reason: String,
    },

    DeletionParked {
        volume: String,
        attempts: u32,
        last_failure: chrono::DateTime<chrono::Utc>,
        reason: String,
    },

    LeadershipAcquired {
        lease: String,
    },

    LeadershipLost {
        lease: String,
    },
}

impl ControllerEvent {
    /// Default severity for this event
    pub fn severity(&self) -> EventSeverity {
        match self {
            ControllerEvent::ProvisioningSucceeded { .. }
            | ControllerEvent::DeletionSucceeded { .. }
            | ControllerEvent::LeadershipAcquired { .. } => EventSeverity::Info,
            ControllerEvent::ProvisioningNotReady { .. }
            | ControllerEvent::DeletionSkipped { .. } => EventSeverity::Debug,
            ControllerEvent::ProvisioningFailed { .. }
            | ControllerEvent::DeletionFailed { .. }
            | ControllerEvent::LeadershipLost { .. } => EventSeverity::Warning,
            ControllerEvent::ProvisioningParked { .. }
            | ControllerEvent::DeletionParked { .. } => EventSeverity::Error,
        }
    }

    /// Short machine-readable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            ControllerEvent::ProvisioningSucceeded { .. } => "ProvisioningSucceeded",
            ControllerEvent::ProvisioningNotReady { .. } => "ProvisioningNotReady",
            ControllerEvent::ProvisioningFailed { .. } => "ProvisioningFailed",
            ControllerEvent::ProvisioningParked { .. } => "ProvisioningParked",
            ControllerEvent::DeletionSucceeded { .. } => "VolumeDeleted",
            ControllerEvent::DeletionSkipped { .. } => "VolumeDeletionSkipped",
            ControllerEvent::DeletionFailed { .. } => "VolumeFailedDelete",
            ControllerEvent::DeletionParked { .. } => "VolumeDeletionParked",
            ControllerEvent::LeadershipAcquired { .. } => "LeaderElection",
            ControllerEvent::LeadershipLost { .. } => "LeaderElectionLost",
        }
    }
}
