//! Host address discovery for the status page and startup log

use std::net::Ipv4Addr;

use tracing::warn;

/// Name shown when the host has no usable IPv4 address
pub const FALLBACK_HOST: &str = "localhost";

/// Non-loopback IPv4 addresses of interfaces that are up, with container
/// bridge networks filtered out. Falls back to [`FALLBACK_HOST`].
pub fn host_addresses() -> Vec<String> {
    match interface_ipv4s() {
        Ok(candidates) => select_addresses(candidates),
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            vec![FALLBACK_HOST.to_string()]
        }
    }
}

/// Filter and de-duplicate candidate addresses, preserving order
pub fn select_addresses(candidates: impl IntoIterator<Item = Ipv4Addr>) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for ip in candidates {
        if ip.is_loopback() || ip.is_unspecified() || is_container_bridge(ip) {
            continue;
        }
        let ip = ip.to_string();
        if !selected.contains(&ip) {
            selected.push(ip);
        }
    }

    if selected.is_empty() {
        selected.push(FALLBACK_HOST.to_string());
    }
    selected
}

/// 172.17.0.0/16 (default bridge) through 172.31.0.0/16 (user-defined bridges)
fn is_container_bridge(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 172 && (17..=31).contains(&b)
}

#[cfg(unix)]
fn interface_ipv4s() -> nix::Result<Vec<Ipv4Addr>> {
    use nix::net::if_::InterfaceFlags;

    let found = nix::ifaddrs::getifaddrs()?
        .filter(|ifa| {
            ifa.flags.contains(InterfaceFlags::IFF_UP)
                && !ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        })
        .filter_map(|ifa| ifa.address?.as_sockaddr_in().map(|sin| sin.ip()))
        .collect();
    Ok(found)
}

#[cfg(not(unix))]
fn interface_ipv4s() -> std::io::Result<Vec<Ipv4Addr>> {
    Ok(Vec::new())
}
