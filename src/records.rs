use crate::keys::KeyRole;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// DNS class for all records handled by the signer (only IN is supported)
pub const CLASS_IN: u16 = 1;

/// Resource record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RrType {
    Soa,
    Ns,
    A,
    Aaaa,
    Cname,
    Ptr,
    Mx,
    Txt,
    Srv,
    Ds,
    Dnskey,
    Nsec,
    Nsec3,
    Nsec3Param,
    Other(u16),
}

impl RrType {
    pub fn to_u16(self) -> u16 {
        match self {
            RrType::A => 1,
            RrType::Ns => 2,
            RrType::Cname => 5,
            RrType::Soa => 6,
            RrType::Ptr => 12,
            RrType::Mx => 15,
            RrType::Txt => 16,
            RrType::Aaaa => 28,
            RrType::Srv => 33,
            RrType::Ds => 43,
            RrType::Nsec => 47,
            RrType::Dnskey => 48,
            RrType::Nsec3 => 50,
            RrType::Nsec3Param => 51,
            RrType::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1 => RrType::A,
            2 => RrType::Ns,
            5 => RrType::Cname,
            6 => RrType::Soa,
            12 => RrType::Ptr,
            15 => RrType::Mx,
            16 => RrType::Txt,
            28 => RrType::Aaaa,
            33 => RrType::Srv,
            43 => RrType::Ds,
            47 => RrType::Nsec,
            48 => RrType::Dnskey,
            50 => RrType::Nsec3,
            51 => RrType::Nsec3Param,
            other => RrType::Other(other),
        }
    }
}

impl fmt::Display for RrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrType::Soa => write!(f, "SOA"),
            RrType::Ns => write!(f, "NS"),
            RrType::A => write!(f, "A"),
            RrType::Aaaa => write!(f, "AAAA"),
            RrType::Cname => write!(f, "CNAME"),
            RrType::Ptr => write!(f, "PTR"),
            RrType::Mx => write!(f, "MX"),
            RrType::Txt => write!(f, "TXT"),
            RrType::Srv => write!(f, "SRV"),
            RrType::Ds => write!(f, "DS"),
            RrType::Dnskey => write!(f, "DNSKEY"),
            RrType::Nsec => write!(f, "NSEC"),
            RrType::Nsec3 => write!(f, "NSEC3"),
            RrType::Nsec3Param => write!(f, "NSEC3PARAM"),
            // RFC 3597 generic type name
            RrType::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

impl FromStr for RrType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SOA" => Ok(RrType::Soa),
            "NS" => Ok(RrType::Ns),
            "A" => Ok(RrType::A),
            "AAAA" => Ok(RrType::Aaaa),
            "CNAME" => Ok(RrType::Cname),
            "PTR" => Ok(RrType::Ptr),
            "MX" => Ok(RrType::Mx),
            "TXT" => Ok(RrType::Txt),
            "SRV" => Ok(RrType::Srv),
            "DS" => Ok(RrType::Ds),
            "DNSKEY" => Ok(RrType::Dnskey),
            "NSEC" => Ok(RrType::Nsec),
            "NSEC3" => Ok(RrType::Nsec3),
            "NSEC3PARAM" => Ok(RrType::Nsec3Param),
            other => {
                if let Some(code) = other.strip_prefix("TYPE") {
                    code.parse::<u16>()
                        .map(RrType::from_u16)
                        .map_err(|_| format!("Invalid record type: {}", other))
                } else {
                    Err(format!("Invalid record type: {}", other))
                }
            }
        }
    }
}

// Stable ordering by type code so that commit order is deterministic
impl Ord for RrType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_u16().cmp(&other.to_u16())
    }
}

impl PartialOrd for RrType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lifecycle state of a record within its RRset.
///
/// A record staged for deletion is still part of the committed view until
/// `commit` runs; a record staged for addition is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RrState {
    /// Committed, part of the authoritative zone content
    Current,
    /// Staged by the running pass, becomes Current on commit
    PendingAdd,
    /// Committed but staged for removal, dropped on commit
    PendingDelete,
}

/// Immutable record data: owner name, type, TTL and opaque rdata.
///
/// TTL is deliberately excluded from signed-content equality: a TTL-only
/// change updates the stored record without forcing a re-sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    owner: String,
    rtype: RrType,
    ttl: u32,
    rdata: Bytes,
}

impl RecordData {
    pub fn new(owner: &str, rtype: RrType, ttl: u32, rdata: impl Into<Bytes>) -> Self {
        Self {
            owner: normalize_owner(owner),
            rtype,
            ttl,
            rdata: rdata.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn rtype(&self) -> RrType {
        self.rtype
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    pub fn rdata(&self) -> &Bytes {
        &self.rdata
    }

    /// Equality of signed content: owner, type and rdata, ignoring TTL
    pub fn signed_eq(&self, other: &RecordData) -> bool {
        self.owner == other.owner && self.rtype == other.rtype && self.rdata == other.rdata
    }

    /// Canonical wire form of this record, used as part of the signing input
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = owner_wire(&self.owner);
        out.extend_from_slice(&self.rtype.to_u16().to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rdata);
        out
    }
}

/// A resource record owned by exactly one RRset
#[derive(Debug, Clone)]
pub struct Rr {
    pub data: RecordData,
    pub state: RrState,
}

impl Rr {
    pub fn new(data: RecordData, state: RrState) -> Self {
        Self { data, state }
    }
}

/// A signature covering one RRset, produced by one signing key.
///
/// The key locator and flags let a signature be matched back to the key that
/// produced it after a key rollover or an HSM reattach.
#[derive(Debug, Clone, PartialEq)]
pub struct Rrsig {
    pub key_locator: Uuid,
    pub key_flags: u16,
    pub role: KeyRole,
    pub inception: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl Rrsig {
    /// Whether this signature expires within the given refresh window
    pub fn needs_refresh(&self, now: DateTime<Utc>, refresh: chrono::Duration) -> bool {
        self.expiration - refresh <= now
    }
}

/// Lowercase a domain name and ensure it carries a trailing dot
pub fn normalize_owner(owner: &str) -> String {
    let lower = owner.trim().to_lowercase();
    if lower == "." || lower.is_empty() {
        return ".".to_string();
    }
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.", lower)
    }
}

/// Encode a domain name to DNS wire format (lowercased labels)
pub fn owner_wire(owner: &str) -> Vec<u8> {
    let mut encoded = Vec::new();
    for label in owner.split('.') {
        if label.is_empty() {
            continue;
        }
        encoded.push(label.len() as u8);
        encoded.extend_from_slice(label.as_bytes());
    }
    encoded.push(0); // root label
    encoded
}

/// Canonical signing input for a set of records: each record's wire form,
/// sorted by rdata so the result is independent of insertion order.
pub fn canonical_rrset_bytes<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a RecordData>,
{
    let mut records: Vec<&RecordData> = records.into_iter().collect();
    records.sort_by(|a, b| a.rdata().cmp(b.rdata()));

    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.canonical_bytes());
    }
    out
}
