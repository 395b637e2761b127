//! IPv4 prefix arithmetic used by derived fields.

use super::*;

use std::net::{IpAddr, Ipv4Addr};

/// Netmask for a prefix length, `24` -> `255.255.255.0`.
pub fn prefix_to_mask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let bits = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    Some(Ipv4Addr::from(bits))
}

/// Prefix length of a contiguous netmask.
pub fn mask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return None;
    }
    u8::try_from(prefix).ok()
}

pub fn network_address(address: Ipv4Addr, prefix: u8) -> Option<Ipv4Addr> {
    let mask = prefix_to_mask(prefix)?;
    Some(Ipv4Addr::from(u32::from(address) & u32::from(mask)))
}

/// Splits a route destination into address and prefix length.
///
/// Accepts `default`, `a.b.c.d/n`, `a.b.c.d/m.m.m.m` and a bare host address.
pub fn split_cidr(text: &str) -> Option<(Ipv4Addr, u8)> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("default") {
        return Some((Ipv4Addr::UNSPECIFIED, 0));
    }
    let Some((address, suffix)) = text.split_once('/') else {
        return text.parse().ok().map(|address| (address, 32));
    };
    let address: Ipv4Addr = address.parse().ok()?;
    let prefix = if suffix.contains('.') {
        mask_to_prefix(suffix.parse().ok()?)?
    } else {
        let prefix: u8 = suffix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        prefix
    };
    Some((address, prefix))
}

pub fn is_address(text: &str) -> bool {
    text.parse::<IpAddr>().is_ok()
}

/// A hostname or address: non-empty, no whitespace.
pub fn is_host(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace)
}

fn prefix_of(value: &Value) -> Option<u8> {
    value.as_int().and_then(|prefix| u8::try_from(prefix).ok())
}

impl Derivation {
    /// Field names this derivation writes.
    pub fn outputs(&self) -> Vec<&str> {
        match self {
            Derivation::NetworkAddress { output, .. }
            | Derivation::PrefixToMask { output, .. }
            | Derivation::MaskToPrefix { output, .. } => vec![output.as_str()],
            Derivation::SplitCidr {
                address, prefix, ..
            } => vec![address.as_str(), prefix.as_str()],
        }
    }

    /// Field names this derivation reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Derivation::NetworkAddress {
                address, prefix, ..
            } => vec![address.as_str(), prefix.as_str()],
            Derivation::PrefixToMask { input, .. }
            | Derivation::MaskToPrefix { input, .. }
            | Derivation::SplitCidr { input, .. } => vec![input.as_str()],
        }
    }

    /// Computes the outputs in place. A missing or unusable input leaves them unset.
    pub(crate) fn apply(&self, values: &mut BTreeMap<String, Value>) {
        match self {
            Derivation::NetworkAddress {
                address,
                prefix,
                output,
            } => {
                let network = values
                    .get(address)
                    .and_then(Value::as_str)
                    .and_then(|a| a.parse::<Ipv4Addr>().ok())
                    .zip(values.get(prefix).and_then(prefix_of))
                    .and_then(|(a, p)| network_address(a, p));
                if let Some(network) = network {
                    values.insert(output.clone(), Value::Text(network.to_string()));
                }
            }
            Derivation::PrefixToMask { input, output } => {
                if let Some(mask) = values.get(input).and_then(prefix_of).and_then(prefix_to_mask) {
                    values.insert(output.clone(), Value::Text(mask.to_string()));
                }
            }
            Derivation::MaskToPrefix { input, output } => {
                let prefix = values
                    .get(input)
                    .and_then(Value::as_str)
                    .and_then(|m| m.parse::<Ipv4Addr>().ok())
                    .and_then(mask_to_prefix);
                if let Some(prefix) = prefix {
                    values.insert(output.clone(), Value::Int(i64::from(prefix)));
                }
            }
            Derivation::SplitCidr {
                input,
                address,
                prefix,
            } => {
                if let Some((a, p)) = values.get(input).and_then(Value::as_str).and_then(split_cidr) {
                    values.insert(address.clone(), Value::Text(a.to_string()));
                    values.insert(prefix.clone(), Value::Int(i64::from(p)));
                }
            }
        }
    }
}
