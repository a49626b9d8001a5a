// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small shared helpers: address parsing, CIDR expansion, local IP discovery.

pub mod net;

pub use net::{cidr_to_ips, local_ip, parse_ips_from_string, ENV_LOCAL_IP};
