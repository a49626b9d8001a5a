// SPDX-License-Identifier: MIT OR Apache-2.0

//! Address-list parsing and CIDR expansion for role groups and network specs.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::warn;

use crate::error::{Result, XmError};

/// Environment variable overriding local IP discovery.
pub const ENV_LOCAL_IP: &str = "XMLOCALIP";

/// Expanding a CIDR stops after this many addresses.
const MAX_CIDR_ADDRESSES: usize = 65_536;

/// Parse a comma-separated list of IP addresses and/or IPv4 CIDR blocks.
///
/// Empty input yields an empty list. Blank segments (from doubled or trailing
/// commas) are skipped. CIDR blocks are expanded to their member addresses.
///
/// # Errors
///
/// Returns an error if a non-blank segment is neither a valid IP address nor
/// a valid IPv4 CIDR block.
pub fn parse_ips_from_string(s: &str) -> Result<Vec<String>> {
    let mut ips = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.contains('/') {
            ips.extend(cidr_to_ips(part)?);
        } else {
            let addr: IpAddr = part
                .parse()
                .map_err(|_| XmError::Validation(format!("invalid IP address: {part}")))?;
            ips.push(addr.to_string());
        }
    }
    Ok(ips)
}

/// Expand an IPv4 CIDR block into its member addresses, starting at the
/// network address.
///
/// Blocks larger than 65 536 addresses are truncated at 65 536 with a
/// warning.
///
/// # Errors
///
/// Returns an error if the block is not a valid `a.b.c.d/len` IPv4 CIDR.
pub fn cidr_to_ips(cidr: &str) -> Result<Vec<String>> {
    let (addr_part, len_part) = cidr
        .split_once('/')
        .ok_or_else(|| XmError::Validation(format!("invalid CIDR: {cidr}")))?;
    let addr: Ipv4Addr = addr_part
        .parse()
        .map_err(|_| XmError::Validation(format!("invalid CIDR address: {cidr}")))?;
    let len: u32 = len_part
        .parse()
        .map_err(|_| XmError::Validation(format!("invalid CIDR prefix length: {cidr}")))?;
    if len > 32 {
        return Err(XmError::Validation(format!(
            "invalid CIDR prefix length: {cidr}"
        )));
    }

    let mask: u32 = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    let network = u32::from(addr) & mask;
    let size = 1u64 << (32 - len);
    let count = if size > MAX_CIDR_ADDRESSES as u64 {
        warn!(
            cidr,
            limit = MAX_CIDR_ADDRESSES,
            "CIDR block truncated to the first {} addresses",
            MAX_CIDR_ADDRESSES
        );
        MAX_CIDR_ADDRESSES
    } else {
        size as usize
    };

    let mut ips = Vec::with_capacity(count);
    for offset in 0..count as u32 {
        ips.push(Ipv4Addr::from(network + offset).to_string());
    }
    Ok(ips)
}

/// Discover the local IP address used for outbound traffic.
///
/// `XMLOCALIP` overrides discovery when set. Otherwise the kernel picks the
/// source address for a UDP socket aimed at a public endpoint; no packets are
/// actually sent.
///
/// # Errors
///
/// Returns an error if the override is not a valid address or no route is
/// available.
pub fn local_ip() -> Result<IpAddr> {
    if let Ok(override_ip) = std::env::var(ENV_LOCAL_IP) {
        return override_ip
            .parse()
            .map_err(|_| XmError::Config(format!("invalid {ENV_LOCAL_IP}: {override_ip}")));
    }
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:53")?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_string() {
        assert_eq!(parse_ips_from_string("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_parse_skips_blank_segments() {
        assert_eq!(
            parse_ips_from_string("1.1.1.1,,2.2.2.2").unwrap(),
            vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]
        );
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            parse_ips_from_string(" 10.0.0.1 , 10.0.0.2 ").unwrap(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }

    #[test]
    fn test_parse_ipv6() {
        assert_eq!(
            parse_ips_from_string("192.168.0.1,fd00::1").unwrap(),
            vec!["192.168.0.1".to_string(), "fd00::1".to_string()]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_ips_from_string("not-an-ip").is_err());
    }

    #[test]
    fn test_cidr_small_block() {
        let ips = cidr_to_ips("192.168.1.0/30").unwrap();
        assert_eq!(
            ips,
            vec!["192.168.1.0", "192.168.1.1", "192.168.1.2", "192.168.1.3"]
        );
    }

    #[test]
    fn test_cidr_first_is_network_address() {
        let ips = cidr_to_ips("10.1.2.3/24").unwrap();
        assert_eq!(ips[0], "10.1.2.0");
        assert_eq!(ips.len(), 256);
    }

    #[test]
    fn test_cidr_truncated_at_cap() {
        let ips = cidr_to_ips("10.0.0.0/8").unwrap();
        assert_eq!(ips.len(), 65_536);
        assert_eq!(ips[0], "10.0.0.0");
    }

    #[test]
    fn test_cidr_rejects_bad_prefix() {
        assert!(cidr_to_ips("10.0.0.0/33").is_err());
        assert!(cidr_to_ips("10.0.0.0").is_err());
    }
}
