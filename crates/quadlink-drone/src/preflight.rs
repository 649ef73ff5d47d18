//! Network link preflight checks
//!
//! The drone is only reachable while the host is joined to the drone's own
//! access point, so every connect attempt starts by snapshotting the active
//! link: is anything up, is it wireless, and does the network name carry the
//! expected prefix. The snapshot comes from platform tools (`nmcli`,
//! `netsh`, `networksetup`) and the parsers are pure functions so they can
//! be tested against captured output.

use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use quadlink_core::prelude::*;

/// Static regex for the `State` field of `netsh wlan show interfaces`
static NETSH_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*State\s*:\s*(.+?)\s*$").expect("Invalid state regex"));

/// Static regex for the `SSID` field (the leading `\s*` rejects `BSSID`)
static NETSH_SSID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*SSID\s*:\s*(.+?)\s*$").expect("Invalid SSID regex"));

/// Static regex for `networksetup -getairportnetwork` output
static AIRPORT_NETWORK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Current Wi-Fi Network:\s*(.+?)\s*$").expect("Invalid airport regex")
});

// ── LinkReport ────────────────────────────────────────────────────────────────

/// The kind of network link currently carrying the host's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Wifi,
    Wired,
    Cellular,
    Other(String),
    /// No link is up at all.
    Down,
}

impl LinkKind {
    /// Short label for error messages and logs.
    pub fn label(&self) -> &str {
        match self {
            LinkKind::Wifi => "wifi",
            LinkKind::Wired => "ethernet",
            LinkKind::Cellular => "cellular",
            LinkKind::Other(name) => name,
            LinkKind::Down => "down",
        }
    }
}

/// Snapshot of the host's active network link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub kind: LinkKind,
    /// Wireless identity (network name). `None` when the platform withholds
    /// it, e.g. the macOS location-privacy restriction.
    pub ssid: Option<String>,
}

impl LinkReport {
    pub fn wifi(ssid: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Wifi,
            ssid: Some(ssid.into()),
        }
    }

    /// A wireless link whose identity could not be read.
    pub fn wifi_unnamed() -> Self {
        Self {
            kind: LinkKind::Wifi,
            ssid: None,
        }
    }

    pub fn down() -> Self {
        Self {
            kind: LinkKind::Down,
            ssid: None,
        }
    }
}

// ── NetworkStatus seam ────────────────────────────────────────────────────────

/// Read-only view of the host's network state.
///
/// The session orchestrator and tests exercise the preflight through this
/// trait; [`SystemNetworkStatus`] is the production implementation.
#[trait_variant::make(NetworkStatus: Send)]
pub trait LocalNetworkStatus {
    /// Snapshot the active link. Must not mutate network state.
    async fn link_report(&self) -> Result<LinkReport>;
}

// ── check ─────────────────────────────────────────────────────────────────────

/// Verify the host is on a link the drone can be reached over.
///
/// Failure precedence when several conditions hold at once: no connection,
/// then wrong link type, then wrong network. The network name is matched by
/// prefix only since each unit appends its own suffix. A withheld identity
/// degrades the check to link-type-only and trusts the operator.
pub async fn check<N: NetworkStatus>(provider: &N, expected_prefix: &str) -> Result<LinkReport> {
    let report = provider.link_report().await?;

    match &report.kind {
        LinkKind::Down => Err(Error::NoConnection),
        LinkKind::Wifi => match &report.ssid {
            Some(ssid) if ssid.starts_with(expected_prefix) => {
                debug!("preflight ok: on \"{ssid}\"");
                Ok(report)
            }
            Some(ssid) => Err(Error::wrong_network(ssid, expected_prefix)),
            None => {
                warn!("wireless identity withheld by the platform; skipping network name check");
                Ok(report)
            }
        },
        other => Err(Error::wrong_link_type(other.label())),
    }
}

// ── SystemNetworkStatus ───────────────────────────────────────────────────────

/// Production [`NetworkStatus`] backed by the platform's network tooling.
///
/// Queries are best-effort: a missing tool degrades to an unnamed wireless
/// report (with a warning) rather than blocking the operator on a check we
/// cannot perform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetworkStatus;

impl NetworkStatus for SystemNetworkStatus {
    async fn link_report(&self) -> Result<LinkReport> {
        query_link_report().await
    }
}

/// Run a platform tool and capture stdout, lossy-decoded.
///
/// Returns `Ok(None)` when the tool is not installed. Non-zero exits still
/// yield output: several of these tools exit non-zero for conditions we want
/// to parse (e.g. "not associated").
async fn tool_output(program: &str, args: &[&str]) -> Result<Option<String>> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.status.success() {
                debug!(
                    "{program} exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(Some(stdout))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{program} not found; cannot verify the network link");
            Ok(None)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(target_os = "linux")]
async fn query_link_report() -> Result<LinkReport> {
    let Some(status) = tool_output(
        "nmcli",
        &["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device", "status"],
    )
    .await?
    else {
        return Ok(LinkReport::wifi_unnamed());
    };

    let (kind, connection) = parse_nmcli_device_status(&status);
    if kind != LinkKind::Wifi {
        return Ok(LinkReport { kind, ssid: None });
    }

    // The connection profile name usually equals the network name, but ask
    // for the active access point to be sure.
    let ssid = match tool_output("nmcli", &["-t", "-f", "ACTIVE,SSID", "dev", "wifi"]).await? {
        Some(wifi) => parse_nmcli_active_wifi(&wifi).or(connection),
        None => connection,
    };

    Ok(LinkReport {
        kind: LinkKind::Wifi,
        ssid,
    })
}

#[cfg(target_os = "windows")]
async fn query_link_report() -> Result<LinkReport> {
    let Some(wlan) = tool_output("netsh", &["wlan", "show", "interfaces"]).await? else {
        return Ok(LinkReport::wifi_unnamed());
    };

    if let Some(ssid) = parse_netsh_wlan(&wlan) {
        return Ok(LinkReport::wifi(ssid));
    }

    // No wireless association; look for any other connected interface so we
    // can tell "wrong link type" apart from "no connection".
    let wired = match tool_output("netsh", &["interface", "show", "interface"]).await? {
        Some(list) => parse_netsh_interface_list(&list),
        None => false,
    };

    if wired {
        Ok(LinkReport {
            kind: LinkKind::Wired,
            ssid: None,
        })
    } else {
        Ok(LinkReport::down())
    }
}

#[cfg(target_os = "macos")]
async fn query_link_report() -> Result<LinkReport> {
    let Some(airport) = tool_output("networksetup", &["-getairportnetwork", "en0"]).await? else {
        return Ok(LinkReport::wifi_unnamed());
    };

    match parse_airport_network(&airport) {
        AirportNetwork::Associated(ssid) => Ok(LinkReport::wifi(ssid)),
        AirportNetwork::Withheld => Ok(LinkReport::wifi_unnamed()),
        AirportNetwork::NotAssociated => {
            // Not on wifi; check for a default route over some other link.
            let iface = match tool_output("route", &["-n", "get", "default"]).await? {
                Some(route) => parse_route_interface(&route),
                None => None,
            };
            match iface {
                Some(name) => {
                    debug!("default route over {name}, not wifi");
                    Ok(LinkReport {
                        kind: LinkKind::Wired,
                        ssid: None,
                    })
                }
                None => Ok(LinkReport::down()),
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
async fn query_link_report() -> Result<LinkReport> {
    warn!("no link query tooling for this platform; assuming wireless");
    Ok(LinkReport::wifi_unnamed())
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device status`.
///
/// One `device:type:state:connection` line per device. A wifi device in
/// state `connected` wins over any other connected link since the drone link
/// is wireless by definition.
fn parse_nmcli_device_status(output: &str) -> (LinkKind, Option<String>) {
    let mut fallback: Option<LinkKind> = None;

    for line in output.lines() {
        let mut fields = line.splitn(4, ':');
        let _device = fields.next().unwrap_or_default();
        let kind = fields.next().unwrap_or_default();
        let state = fields.next().unwrap_or_default();
        let connection = fields.next().unwrap_or_default();

        if kind == "loopback" || !state.starts_with("connected") {
            continue;
        }

        if kind == "wifi" {
            let name = (!connection.is_empty()).then(|| unescape_nmcli(connection));
            return (LinkKind::Wifi, name);
        }

        if fallback.is_none() {
            fallback = Some(match kind {
                "ethernet" => LinkKind::Wired,
                "gsm" | "cdma" => LinkKind::Cellular,
                other => LinkKind::Other(other.to_string()),
            });
        }
    }

    (fallback.unwrap_or(LinkKind::Down), None)
}

/// Parse `nmcli -t -f ACTIVE,SSID dev wifi` for the active access point.
fn parse_nmcli_active_wifi(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (active, ssid) = line.split_once(':')?;
        (active == "yes" && !ssid.is_empty()).then(|| unescape_nmcli(ssid))
    })
}

/// Terse-mode nmcli escapes `:` and `\` in values.
fn unescape_nmcli(value: &str) -> String {
    value.replace("\\:", ":").replace("\\\\", "\\")
}

/// Parse `netsh wlan show interfaces`; `Some(ssid)` when associated.
fn parse_netsh_wlan(output: &str) -> Option<String> {
    let state = NETSH_STATE.captures(output)?.get(1)?.as_str();
    if !state.eq_ignore_ascii_case("connected") {
        return None;
    }
    let ssid = NETSH_SSID.captures(output)?.get(1)?.as_str();
    (!ssid.is_empty()).then(|| ssid.to_string())
}

/// Parse `netsh interface show interface`; true if any interface is connected.
fn parse_netsh_interface_list(output: &str) -> bool {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with('-'))
        .skip(1)
        .any(|line| line.split_whitespace().any(|field| field == "Connected"))
}

/// Result of `networksetup -getairportnetwork`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AirportNetwork {
    Associated(String),
    /// Associated, but the name is privacy-redacted.
    Withheld,
    NotAssociated,
}

fn parse_airport_network(output: &str) -> AirportNetwork {
    if output.contains("not associated") {
        return AirportNetwork::NotAssociated;
    }
    match AIRPORT_NETWORK
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        Some("<redacted>") | Some("") | None => AirportNetwork::Withheld,
        Some(ssid) => AirportNetwork::Associated(ssid.to_string()),
    }
}

/// Parse `route -n get default` for the interface name.
fn parse_route_interface(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "interface" && !value.trim().is_empty())
            .then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    // Import the Send variant only: with `LocalNetworkStatus` also in scope,
    // the blanket impl makes `.link_report()` calls ambiguous (E0034).
    use super::{
        check, parse_airport_network, parse_nmcli_active_wifi, parse_nmcli_device_status,
        parse_netsh_interface_list, parse_netsh_wlan, parse_route_interface, AirportNetwork,
        LinkKind, LinkReport, NetworkStatus, SystemNetworkStatus,
    };
    use crate::test_utils::FixedNetworkStatus;
    use quadlink_core::prelude::*;

    // ── nmcli ──

    #[test]
    fn test_parse_nmcli_wifi_connected() {
        let output = "lo:loopback:unmanaged:\nwlan0:wifi:connected:TELLO-C3D5E2\n";
        let (kind, name) = parse_nmcli_device_status(output);
        assert_eq!(kind, LinkKind::Wifi);
        assert_eq!(name.as_deref(), Some("TELLO-C3D5E2"));
    }

    #[test]
    fn test_parse_nmcli_prefers_wifi_over_wired() {
        let output = "eth0:ethernet:connected:Wired connection 1\n\
                      wlan0:wifi:connected:TELLO-AA11BB\n";
        let (kind, name) = parse_nmcli_device_status(output);
        assert_eq!(kind, LinkKind::Wifi);
        assert_eq!(name.as_deref(), Some("TELLO-AA11BB"));
    }

    #[test]
    fn test_parse_nmcli_wired_only() {
        let output = "lo:loopback:unmanaged:\neth0:ethernet:connected:Wired connection 1\n\
                      wlan0:wifi:disconnected:\n";
        let (kind, name) = parse_nmcli_device_status(output);
        assert_eq!(kind, LinkKind::Wired);
        assert!(name.is_none());
    }

    #[test]
    fn test_parse_nmcli_everything_down() {
        let output = "lo:loopback:unmanaged:\nwlan0:wifi:disconnected:\neth0:ethernet:unavailable:\n";
        let (kind, _) = parse_nmcli_device_status(output);
        assert_eq!(kind, LinkKind::Down);
    }

    #[test]
    fn test_parse_nmcli_externally_connected_counts() {
        // nmcli reports "connected (externally)" for links it did not set up
        let output = "wlan0:wifi:connected (externally):TELLO-9F\n";
        let (kind, name) = parse_nmcli_device_status(output);
        assert_eq!(kind, LinkKind::Wifi);
        assert_eq!(name.as_deref(), Some("TELLO-9F"));
    }

    #[test]
    fn test_parse_nmcli_active_wifi() {
        let output = "no:HomeWifi\nyes:TELLO-C3D5E2\nno:Neighbor\n";
        assert_eq!(
            parse_nmcli_active_wifi(output).as_deref(),
            Some("TELLO-C3D5E2")
        );
    }

    #[test]
    fn test_parse_nmcli_active_wifi_none_active() {
        assert!(parse_nmcli_active_wifi("no:HomeWifi\nno:Other\n").is_none());
        assert!(parse_nmcli_active_wifi("").is_none());
    }

    #[test]
    fn test_unescape_nmcli_colon() {
        let output = "yes:Cafe\\: Upstairs\n";
        assert_eq!(
            parse_nmcli_active_wifi(output).as_deref(),
            Some("Cafe: Upstairs")
        );
    }

    // ── netsh ──

    const NETSH_CONNECTED: &str = "\
There is 1 interface on the system:

    Name                   : Wi-Fi
    Description            : Intel(R) Wi-Fi 6 AX201
    Physical address       : 00:11:22:33:44:55
    State                  : connected
    SSID                   : TELLO-58FA21
    BSSID                  : aa:bb:cc:dd:ee:ff
    Radio type             : 802.11n
";

    #[test]
    fn test_parse_netsh_connected() {
        assert_eq!(parse_netsh_wlan(NETSH_CONNECTED).as_deref(), Some("TELLO-58FA21"));
    }

    #[test]
    fn test_parse_netsh_disconnected() {
        let output = "    Name  : Wi-Fi\n    State : disconnected\n";
        assert!(parse_netsh_wlan(output).is_none());
    }

    #[test]
    fn test_parse_netsh_ssid_not_confused_with_bssid() {
        // SSID line after BSSID line; the anchored pattern must not pick up
        // the hardware address.
        let output = "    State : connected\n    BSSID : aa:bb:cc:dd:ee:ff\n    SSID  : Drone-1\n";
        assert_eq!(parse_netsh_wlan(output).as_deref(), Some("Drone-1"));
    }

    #[test]
    fn test_parse_netsh_interface_list() {
        let output = "\
Admin State    State          Type             Interface Name
-------------------------------------------------------------------------
Enabled        Connected      Dedicated        Ethernet
Enabled        Disconnected   Dedicated        Wi-Fi
";
        assert!(parse_netsh_interface_list(output));

        let all_down = "\
Admin State    State          Type             Interface Name
-------------------------------------------------------------------------
Enabled        Disconnected   Dedicated        Ethernet
";
        assert!(!parse_netsh_interface_list(all_down));
    }

    // ── networksetup / route ──

    #[test]
    fn test_parse_airport_associated() {
        let output = "Current Wi-Fi Network: TELLO-ED2291\n";
        assert_eq!(
            parse_airport_network(output),
            AirportNetwork::Associated("TELLO-ED2291".to_string())
        );
    }

    #[test]
    fn test_parse_airport_not_associated() {
        let output = "You are not associated with an AirPort network.\n";
        assert_eq!(parse_airport_network(output), AirportNetwork::NotAssociated);
    }

    #[test]
    fn test_parse_airport_redacted() {
        let output = "Current Wi-Fi Network: <redacted>\n";
        assert_eq!(parse_airport_network(output), AirportNetwork::Withheld);
    }

    #[test]
    fn test_parse_route_interface() {
        let output = "   route to: default\ndestination: default\n  interface: en0\n";
        assert_eq!(parse_route_interface(output).as_deref(), Some("en0"));
        assert!(parse_route_interface("not in table\n").is_none());
    }

    // ── check ──

    #[tokio::test]
    async fn test_check_passes_on_matching_prefix() {
        let provider = FixedNetworkStatus::wifi("TELLO-C3D5E2");
        let report = check(&provider, "TELLO-").await.unwrap();
        assert_eq!(report.ssid.as_deref(), Some("TELLO-C3D5E2"));
    }

    #[tokio::test]
    async fn test_check_no_connection() {
        let provider = FixedNetworkStatus::down();
        let err = check(&provider, "TELLO-").await.unwrap_err();
        assert_eq!(err.to_string(), "No network connection");
    }

    #[tokio::test]
    async fn test_check_wrong_link_type() {
        let provider = FixedNetworkStatus::wired();
        let err = check(&provider, "TELLO-").await.unwrap_err();
        assert!(matches!(err, Error::WrongLinkType { .. }));
        assert!(err.to_string().contains("ethernet"));
    }

    #[tokio::test]
    async fn test_check_wrong_network_names_ssid() {
        let provider = FixedNetworkStatus::wifi("HomeWifi-5G");
        let err = check(&provider, "TELLO-").await.unwrap_err();
        assert!(err.to_string().contains("HomeWifi-5G"));
    }

    #[tokio::test]
    async fn test_check_degrades_when_identity_withheld() {
        let provider = FixedNetworkStatus::wifi_withheld();
        let report = check(&provider, "TELLO-").await.unwrap();
        assert_eq!(report.kind, LinkKind::Wifi);
        assert!(report.ssid.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires platform network tooling
    async fn test_system_link_report_integration() {
        let report = SystemNetworkStatus.link_report().await.unwrap();
        println!("link: {:?} ssid: {:?}", report.kind, report.ssid);
    }
}
