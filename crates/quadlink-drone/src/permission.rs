//! Wireless capability gate
//!
//! Reading the wireless network identity is a gated capability on some
//! platforms. The gate runs before the network preflight on every connect
//! attempt -- grants can be revoked between attempts, so nothing is cached.

use quadlink_core::prelude::*;

/// Access check for the wireless-identity capability.
///
/// [`SystemPermission`] is the production implementation; tests inject the
/// fakes from `test_utils` to drive the denied path.
#[trait_variant::make(WirelessPermission: Send)]
pub trait LocalWirelessPermission {
    /// Verify the capability is usable right now. Called once per connect
    /// attempt; implementations must not cache a previous answer.
    async fn ensure(&self) -> Result<()>;
}

/// Platform permission gate.
///
/// Linux and Windows expose the network identity to any local process, so
/// the gate is a no-op there. On macOS the identity query tool itself is the
/// gated surface: if `networksetup` cannot run there is no way to read the
/// network name, and no way to prompt from a headless process, so the
/// attempt fails with a permission error the operator can act on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPermission;

impl WirelessPermission for SystemPermission {
    async fn ensure(&self) -> Result<()> {
        ensure_platform_grant().await
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
async fn ensure_platform_grant() -> Result<()> {
    Ok(())
}

#[cfg(target_os = "macos")]
async fn ensure_platform_grant() -> Result<()> {
    use tokio::process::Command;

    let result = Command::new("networksetup")
        .arg("-listallhardwareports")
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(Error::permission_denied(format!(
            "networksetup refused the hardware port query (exit {:?})",
            output.status.code()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::permission_denied(
            "networksetup is not available to query the wireless interface",
        )),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
async fn ensure_platform_grant() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    // Import the Send variant only: with `LocalWirelessPermission` also in
    // scope, the blanket impl makes every `.ensure()` call ambiguous (E0034).
    use super::{SystemPermission, WirelessPermission};
    use crate::test_utils::{AllowPermission, DenyPermission};
    use quadlink_core::prelude::*;

    #[tokio::test]
    async fn test_allow_permission_passes() {
        assert!(AllowPermission.ensure().await.is_ok());
    }

    #[tokio::test]
    async fn test_deny_permission_carries_message() {
        let gate = DenyPermission::new("revoked in system settings");
        let err = gate.ensure().await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(err.to_string().contains("revoked in system settings"));
    }

    #[cfg(any(target_os = "linux", target_os = "windows"))]
    #[tokio::test]
    async fn test_system_gate_is_noop_here() {
        assert!(SystemPermission.ensure().await.is_ok());
    }
}
