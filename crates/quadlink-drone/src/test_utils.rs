//! Test utilities for drone-side seams
//!
//! Provides canned implementations of the [`NetworkStatus`] and
//! [`WirelessPermission`] traits so preflight and orchestration logic can be
//! exercised without touching real platform tools.

use quadlink_core::prelude::*;

use crate::permission::WirelessPermission;
use crate::preflight::{LinkKind, LinkReport, NetworkStatus};

/// A network provider that always reports the same link snapshot.
#[derive(Debug, Clone)]
pub struct FixedNetworkStatus {
    report: LinkReport,
}

impl FixedNetworkStatus {
    /// Wireless link joined to the named network.
    pub fn wifi(ssid: &str) -> Self {
        Self {
            report: LinkReport::wifi(ssid),
        }
    }

    /// Wireless link whose network name the platform withholds.
    pub fn wifi_withheld() -> Self {
        Self {
            report: LinkReport::wifi_unnamed(),
        }
    }

    /// Active wired link, no wireless.
    pub fn wired() -> Self {
        Self {
            report: LinkReport {
                kind: LinkKind::Wired,
                ssid: None,
            },
        }
    }

    /// No link up at all.
    pub fn down() -> Self {
        Self {
            report: LinkReport::down(),
        }
    }
}

impl NetworkStatus for FixedNetworkStatus {
    async fn link_report(&self) -> Result<LinkReport> {
        Ok(self.report.clone())
    }
}

/// A permission gate that always grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowPermission;

impl WirelessPermission for AllowPermission {
    async fn ensure(&self) -> Result<()> {
        Ok(())
    }
}

/// A permission gate that always denies with the given message.
#[derive(Debug, Clone)]
pub struct DenyPermission {
    message: String,
}

impl DenyPermission {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl WirelessPermission for DenyPermission {
    async fn ensure(&self) -> Result<()> {
        Err(Error::permission_denied(self.message.clone()))
    }
}
