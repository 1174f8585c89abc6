use crate::keys::KeyRole;
use crate::records::{RecordData, RrType, Rrsig};
use crate::rrset::{RrSet, RrsetKey, RrsetStore};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const RRSET_MARKER: &str = ";;RRset";
const RRSIG_MARKER: &str = ";;RRSIG";
const EOF_MARKER: &str = ";;Eof";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("backup IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed backup at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("backup file is truncated")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Writes the signed zone state to a durable textual log.
///
/// One record per line, signatures carrying locator and key flags so they
/// can be matched back to their keys on recovery. The file is written to a
/// temp path and renamed into place on `finish`, so a crash mid-write
/// leaves the previous backup intact.
pub struct BackupWriter {
    out: BufWriter<File>,
    tmp: PathBuf,
    path: PathBuf,
    rrsets: usize,
}

impl BackupWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let tmp = path.with_extension("backup.tmp");
        let file = File::create(&tmp)?;
        Ok(Self {
            out: BufWriter::new(file),
            tmp,
            path: path.to_path_buf(),
            rrsets: 0,
        })
    }

    /// Write one RRset's post-commit content and its signatures
    pub fn write_rrset(&mut self, rrset: &RrSet) -> Result<()> {
        let records: Vec<&RecordData> = rrset.signed_records().collect();
        if records.is_empty() {
            // fully withdrawn, nothing to restore
            return Ok(());
        }

        writeln!(self.out, "{} {} {}", RRSET_MARKER, rrset.owner(), rrset.rtype())?;
        for record in records {
            writeln!(
                self.out,
                "{} {} IN {} {}",
                record.owner(),
                record.ttl(),
                record.rtype(),
                hex::encode(record.rdata())
            )?;
        }
        // signatures staged this pass cover the content written above
        let signatures = rrset.staged_signatures().unwrap_or(rrset.signatures());
        for sig in signatures {
            writeln!(
                self.out,
                "{} locator={} flags={} role={} inception={} expiration={} sig={}",
                RRSIG_MARKER,
                sig.key_locator,
                sig.key_flags,
                sig.role,
                sig.inception.timestamp(),
                sig.expiration.timestamp(),
                hex::encode(&sig.signature)
            )?;
        }
        self.rrsets += 1;
        Ok(())
    }

    /// Seal the log and atomically replace the previous backup
    pub fn finish(mut self) -> Result<usize> {
        writeln!(self.out, "{}", EOF_MARKER)?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        std::fs::rename(&self.tmp, &self.path)?;
        info!(path = %self.path.display(), rrsets = self.rrsets, "backup written");
        Ok(self.rrsets)
    }
}

/// Restores a signed zone from a backup log, so a restart does not re-sign
/// anything that still carries valid signatures.
pub struct BackupReader;

/// One parsed RRset block, held back until the whole file checks out
struct BackupEntry {
    key: RrsetKey,
    records: Vec<RecordData>,
    signatures: Vec<Rrsig>,
}

impl BackupReader {
    /// Load a backup into the store; returns the number of RRsets restored.
    ///
    /// All-or-nothing: the file is parsed into scratch entries first and the
    /// store is only populated once the end-of-file seal is confirmed. A
    /// truncated or malformed backup leaves the store untouched.
    pub fn load(path: &Path, store: &RrsetStore) -> Result<usize> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut entries: Vec<BackupEntry> = Vec::new();
        let mut sealed = false;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed == EOF_MARKER {
                sealed = true;
                continue;
            }
            if sealed {
                return Err(BackupError::Parse {
                    line: line_no,
                    reason: "content after end-of-file marker".to_string(),
                });
            }

            if let Some(rest) = trimmed.strip_prefix(RRSET_MARKER) {
                let key = parse_rrset_header(rest, line_no)?;
                entries.push(BackupEntry {
                    key,
                    records: Vec::new(),
                    signatures: Vec::new(),
                });
            } else if let Some(rest) = trimmed.strip_prefix(RRSIG_MARKER) {
                let entry = entries.last_mut().ok_or_else(|| BackupError::Parse {
                    line: line_no,
                    reason: "RRSIG outside of an RRset block".to_string(),
                })?;
                entry.signatures.push(parse_rrsig(rest, line_no)?);
            } else {
                let entry = entries.last_mut().ok_or_else(|| BackupError::Parse {
                    line: line_no,
                    reason: "record outside of an RRset block".to_string(),
                })?;
                entry.records.push(parse_record(trimmed, line_no)?);
            }
        }

        if !sealed {
            warn!(path = %path.display(), "backup not sealed, discarding");
            return Err(BackupError::Truncated);
        }

        let rrsets = entries.len();
        for entry in entries {
            let rrset = store.get_or_create(&entry.key);
            let mut guard = rrset.write();
            for record in entry.records {
                guard.recover_rr(record);
            }
            for sig in entry.signatures {
                guard.recover_rrsig(sig);
            }
        }

        info!(path = %path.display(), rrsets, "backup restored");
        Ok(rrsets)
    }
}

fn parse_rrset_header(rest: &str, line: usize) -> Result<RrsetKey> {
    let mut parts = rest.split_whitespace();
    let owner = parts.next().ok_or_else(|| BackupError::Parse {
        line,
        reason: "missing owner in RRset header".to_string(),
    })?;
    let rtype: RrType = parts
        .next()
        .ok_or_else(|| BackupError::Parse {
            line,
            reason: "missing type in RRset header".to_string(),
        })?
        .parse()
        .map_err(|reason| BackupError::Parse { line, reason })?;
    Ok(RrsetKey::new(owner, rtype))
}

fn parse_record(text: &str, line: usize) -> Result<RecordData> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() != 5 || parts[2] != "IN" {
        return Err(BackupError::Parse {
            line,
            reason: "expected '<owner> <ttl> IN <type> <rdata>'".to_string(),
        });
    }
    let ttl: u32 = parts[1].parse().map_err(|_| BackupError::Parse {
        line,
        reason: format!("invalid TTL: {}", parts[1]),
    })?;
    let rtype: RrType = parts[3]
        .parse()
        .map_err(|reason| BackupError::Parse { line, reason })?;
    let rdata = hex::decode(parts[4]).map_err(|e| BackupError::Parse {
        line,
        reason: format!("invalid rdata hex: {}", e),
    })?;
    Ok(RecordData::new(parts[0], rtype, ttl, rdata))
}

fn parse_rrsig(rest: &str, line: usize) -> Result<Rrsig> {
    let mut locator = None;
    let mut flags = None;
    let mut role = None;
    let mut inception = None;
    let mut expiration = None;
    let mut signature = None;

    for field in rest.split_whitespace() {
        let (name, value) = field.split_once('=').ok_or_else(|| BackupError::Parse {
            line,
            reason: format!("malformed RRSIG field: {}", field),
        })?;
        match name {
            "locator" => {
                locator = Some(value.parse::<Uuid>().map_err(|e| BackupError::Parse {
                    line,
                    reason: format!("invalid locator: {}", e),
                })?)
            }
            "flags" => {
                flags = Some(value.parse::<u16>().map_err(|_| BackupError::Parse {
                    line,
                    reason: format!("invalid flags: {}", value),
                })?)
            }
            "role" => {
                role = Some(value.parse::<KeyRole>().map_err(|reason| {
                    BackupError::Parse { line, reason }
                })?)
            }
            "inception" => inception = Some(parse_timestamp(value, line)?),
            "expiration" => expiration = Some(parse_timestamp(value, line)?),
            "sig" => {
                signature = Some(hex::decode(value).map_err(|e| BackupError::Parse {
                    line,
                    reason: format!("invalid signature hex: {}", e),
                })?)
            }
            other => {
                return Err(BackupError::Parse {
                    line,
                    reason: format!("unknown RRSIG field: {}", other),
                });
            }
        }
    }

    match (locator, flags, role, inception, expiration, signature) {
        (Some(locator), Some(flags), Some(role), Some(inception), Some(expiration), Some(sig)) => {
            Ok(Rrsig {
                key_locator: locator,
                key_flags: flags,
                role,
                inception,
                expiration,
                signature: sig,
            })
        }
        _ => Err(BackupError::Parse {
            line,
            reason: "incomplete RRSIG entry".to_string(),
        }),
    }
}

fn parse_timestamp(value: &str, line: usize) -> Result<DateTime<Utc>> {
    let secs: i64 = value.parse().map_err(|_| BackupError::Parse {
        line,
        reason: format!("invalid timestamp: {}", value),
    })?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| BackupError::Parse {
        line,
        reason: format!("timestamp out of range: {}", value),
    })
}
