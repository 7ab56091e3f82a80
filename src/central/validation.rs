//! Input validation for names, TTLs, contacts, record data and blacklist
//! patterns.

use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{CentralError, Result};
use crate::model::RecordType;

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Why a name failed the FQDN rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    MissingTrailingDot,
    TooLong(usize),
    EmptyLabel,
    LabelTooLong(usize),
    InvalidLabelCharacters(String),
    InvalidLabelFormat(String),
    TooFewLabels,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameError::MissingTrailingDot => write!(f, "name must end with a dot"),
            NameError::TooLong(len) => write!(f, "name too long: {} characters", len),
            NameError::EmptyLabel => write!(f, "empty label"),
            NameError::LabelTooLong(len) => write!(f, "label too long: {} characters", len),
            NameError::InvalidLabelCharacters(label) => {
                write!(f, "invalid characters in label: {}", label)
            }
            NameError::InvalidLabelFormat(label) => write!(f, "invalid label format: {}", label),
            NameError::TooFewLabels => write!(f, "zone names need at least two labels"),
        }
    }
}

/// Check FQDN structure and return the lowercased name.
///
/// A leading `*` label is accepted when `allow_wildcard` is set.
pub fn check_fqdn(name: &str, allow_wildcard: bool) -> std::result::Result<String, NameError> {
    let stripped = name.strip_suffix('.').ok_or(NameError::MissingTrailingDot)?;

    if stripped.len() > MAX_NAME_LENGTH {
        return Err(NameError::TooLong(stripped.len()));
    }
    if stripped.is_empty() {
        return Err(NameError::EmptyLabel);
    }

    for (i, label) in stripped.split('.').enumerate() {
        if label.is_empty() {
            return Err(NameError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LENGTH {
            return Err(NameError::LabelTooLong(label.len()));
        }
        if label == "*" && allow_wildcard && i == 0 {
            continue;
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(NameError::InvalidLabelCharacters(label.to_string()));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(NameError::InvalidLabelFormat(label.to_string()));
        }
    }

    Ok(name.to_lowercase())
}

/// Validate a zone name (at least two labels) and return its canonical form
pub fn zone_name(name: &str) -> Result<String> {
    let canonical = check_fqdn(name, false)
        .map_err(|e| CentralError::InvalidDomainName(format!("{}: {}", name, e)))?;
    if canonical.trim_end_matches('.').split('.').count() < 2 {
        return Err(CentralError::InvalidDomainName(format!(
            "{}: {}",
            name,
            NameError::TooFewLabels
        )));
    }
    Ok(canonical)
}

/// Validate a record set owner name and return its canonical form
pub fn recordset_name(name: &str) -> Result<String> {
    check_fqdn(name, true)
        .map_err(|e| CentralError::InvalidRecordSetName(format!("{}: {}", name, e)))
}

/// Zone names strictly above `name`, nearest first, excluding the TLD
pub fn parent_zones(name: &str) -> impl Iterator<Item = &str> {
    let labels = name.trim_end_matches('.').matches('.').count();
    name.match_indices('.')
        .take(labels.saturating_sub(1))
        .map(move |(i, _)| &name[i + 1..])
}

pub fn email(email: &str) -> Result<()> {
    let invalid = || CentralError::InvalidEmail(email.to_string());
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(())
}

pub fn ttl(ttl: u32, min_ttl: u32) -> Result<()> {
    if ttl < min_ttl || ttl > i32::MAX as u32 {
        return Err(CentralError::InvalidTtl(ttl as i64));
    }
    Ok(())
}

/// Validate record data for `rtype` and return the stored form
pub fn record_data(rtype: RecordType, data: &str) -> Result<String> {
    let data = data.trim();
    let invalid = |reason: &str| CentralError::InvalidRecordData(format!("{} {}: {}", rtype, data, reason));

    if data.is_empty() {
        return Err(invalid("empty"));
    }

    match rtype {
        RecordType::A => data
            .parse::<Ipv4Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| invalid("not an IPv4 address")),
        RecordType::AAAA => data
            .parse::<Ipv6Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| invalid("not an IPv6 address")),
        RecordType::CNAME | RecordType::NS | RecordType::PTR => {
            check_fqdn(data, false).map_err(|e| invalid(&e.to_string()))
        }
        RecordType::MX => {
            let (priority, host) = data
                .split_once(char::is_whitespace)
                .ok_or_else(|| invalid("expected \"<priority> <host>\""))?;
            let priority: u16 = priority.parse().map_err(|_| invalid("bad priority"))?;
            let host = check_fqdn(host.trim(), false).map_err(|e| invalid(&e.to_string()))?;
            Ok(format!("{} {}", priority, host))
        }
        RecordType::SRV => {
            let parts: Vec<&str> = data.split_whitespace().collect();
            let [priority, weight, port, target] = parts[..] else {
                return Err(invalid("expected \"<priority> <weight> <port> <target>\""));
            };
            for n in [priority, weight, port] {
                n.parse::<u16>().map_err(|_| invalid("bad number"))?;
            }
            let target = check_fqdn(target, false).map_err(|e| invalid(&e.to_string()))?;
            Ok(format!("{} {} {} {}", priority, weight, port, target))
        }
        RecordType::SSHFP => {
            let parts: Vec<&str> = data.split_whitespace().collect();
            let [algorithm, fp_type, fingerprint] = parts[..] else {
                return Err(invalid("expected \"<algorithm> <type> <fingerprint>\""));
            };
            algorithm.parse::<u8>().map_err(|_| invalid("bad algorithm"))?;
            fp_type.parse::<u8>().map_err(|_| invalid("bad fingerprint type"))?;
            if !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("fingerprint must be hex"));
            }
            Ok(format!("{} {} {}", algorithm, fp_type, fingerprint.to_lowercase()))
        }
        RecordType::TXT | RecordType::SPF => Ok(data.to_string()),
        RecordType::SOA => Err(invalid("SOA records are managed by the zone")),
    }
}

pub fn blacklist_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CentralError::InvalidBlacklistPattern(format!("{}: {}", pattern, e)))
}
