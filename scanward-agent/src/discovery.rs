//! Network discovery with nmap and arping
//!
//! - Subnet sweep: `nmap -sn -oX - <subnet>`, one entry per up host that
//!   reports both an IPv4 and a MAC address
//! - Single-address lookup: `arping -c1 <address>`, first MAC in the output
//!
//! Tool failures are logged and surface as empty or absent results.

use std::time::Duration;

use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use scanward_core::{DiscoveredHost, DiscoveryGateway};

use crate::execution::CommandExecutor;

static MAC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9A-F]{2}(?::[0-9A-F]{2}){5})").expect("MAC regex should compile")
});

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Deserialize)]
struct NmapHost {
    #[serde(default)]
    status: Option<NmapStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
}

#[derive(Debug, Deserialize)]
struct NmapStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
    #[serde(rename = "@vendor", default)]
    vendor: Option<String>,
}

/// Hosts of an nmap XML report that are up and have IPv4 and MAC addresses
pub fn parse_nmap_hosts(xml: &str) -> Result<Vec<DiscoveredHost>, quick_xml::DeError> {
    let run: NmapRun = from_str(xml)?;
    let mut found = Vec::new();
    for host in run.hosts {
        if host.status.as_ref().is_some_and(|s| s.state != "up") {
            continue;
        }
        let ipv4 = host.addresses.iter().find(|a| a.addrtype == "ipv4");
        let mac = host.addresses.iter().find(|a| a.addrtype == "mac");
        let (Some(ipv4), Some(mac)) = (ipv4, mac) else {
            continue;
        };
        debug!(
            address = %ipv4.addr,
            hardware_id = %mac.addr,
            vendor = mac.vendor.as_deref().unwrap_or(""),
            "found host"
        );
        found.push(DiscoveredHost {
            address: ipv4.addr.clone(),
            hardware_id: mac.addr.to_uppercase(),
            label: mac.vendor.clone().unwrap_or_default(),
        });
    }
    Ok(found)
}

/// First MAC address in `output`, uppercased
pub fn find_mac(output: &str) -> Option<String> {
    MAC_REGEX
        .captures(&output.to_uppercase())
        .map(|caps| caps[1].to_string())
}

#[derive(Debug, Clone)]
pub struct NetworkDiscovery {
    nmap_binary: String,
    arping_binary: String,
    timeout: Duration,
}

impl NetworkDiscovery {
    pub fn new(nmap_binary: impl Into<String>, arping_binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            nmap_binary: nmap_binary.into(),
            arping_binary: arping_binary.into(),
            timeout,
        }
    }
}

impl DiscoveryGateway for NetworkDiscovery {
    async fn sweep(&self, subnet: &str) -> Vec<DiscoveredHost> {
        info!(subnet, "scanning for machines");
        let args = ["-sn", "-oX", "-", subnet].map(String::from);
        let output = match CommandExecutor::run(&self.nmap_binary, &args, self.timeout, "nmap -sn").await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => output,
            Ok(output) => {
                warn!(subnet, stderr = %output.stderr.trim(), "failed to scan network");
                return Vec::new();
            }
            Err(e) => {
                warn!(subnet, "failed to scan network: {}", e);
                return Vec::new();
            }
        };
        match parse_nmap_hosts(&output.stdout) {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(subnet, "unreadable nmap output: {}", e);
                Vec::new()
            }
        }
    }

    async fn resolve_hardware_id(&self, address: &str) -> Option<String> {
        let args = ["-c1", address].map(String::from);
        let output = match CommandExecutor::run(&self.arping_binary, &args, self.timeout, "arping").await {
            Ok(output) => output,
            Err(e) => {
                error!(address, "failed to get mac address: {}", e);
                return None;
            }
        };
        let mac = find_mac(&output.stdout);
        debug!(address, hardware_id = ?mac, "current mac");
        mac
    }
}
