//! Lease record for leader election

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A time-bounded, renewable exclusivity record.
///
/// At most one holder is valid at a time. A lease whose holder has not
/// renewed within `lease_duration` is expired and may be taken over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease name
    pub name: String,

    /// Current holder, `None` once released
    pub holder: Option<String>,

    /// When the current holder acquired the lease
    pub acquired_at: chrono::DateTime<chrono::Utc>,

    /// Last successful renewal
    pub renewed_at: chrono::DateTime<chrono::Utc>,

    /// How long a renewal stays valid
    #[serde(with = "crate::duration_serde")]
    pub lease_duration: Duration,

    /// Number of holder changes
    pub transitions: u32,

    /// Optimistic concurrency version, maintained by the store
    pub version: u64,
}

impl Lease {
    /// Create a lease held by `holder`, starting now
    pub fn acquired(
        name: impl Into<String>,
        holder: impl Into<String>,
        lease_duration: Duration,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            holder: Some(holder.into()),
            acquired_at: now,
            renewed_at: now,
            lease_duration,
            transitions: 0,
            version: 0,
        }
    }

    /// When the current renewal runs out
    pub fn expires_at(&self) -> chrono::DateTime<chrono::Utc> {
        let duration = chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.renewed_at + duration
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at() <= now
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder.as_deref() == Some(identity)
    }

    /// Whether `identity` may take the lease at `now`
    pub fn can_acquire(&self, identity: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.holder.as_deref() {
            None => true,
            Some(holder) if holder == identity => true,
            Some(_) => self.is_expired(now),
        }
    }
}
