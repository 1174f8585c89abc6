use super::errors::{Result, RrsetError};
use crate::keys::KeyList;
use crate::records::{Rr, RrState, RrType, RecordData, Rrsig, canonical_rrset_bytes};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// Outcome of committing one RRset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Records promoted from pending-add to current
    pub added: usize,
    /// Records dropped from current
    pub deleted: usize,
    /// The RRset holds no records after commit and can be purged
    pub empty: bool,
}

/// The unit of DNSSEC signing: all records sharing an owner name and type,
/// together with the signatures covering them.
///
/// Record membership is tracked through a three-state tag: `Current` records
/// are committed zone content, `PendingAdd`/`PendingDelete` records are
/// staged by the running pass and only take effect on `commit`. A record
/// staged for deletion remains part of the committed view until then.
#[derive(Debug, Clone)]
pub struct RrSet {
    owner: String,
    rtype: RrType,
    records: Vec<Rr>,
    signatures: Vec<Rrsig>,
    staged_signatures: Option<Vec<Rrsig>>,
    needs_signing: bool,
}

impl RrSet {
    pub fn new(owner: &str, rtype: RrType) -> Self {
        Self {
            owner: crate::records::normalize_owner(owner),
            rtype,
            records: Vec::new(),
            signatures: Vec::new(),
            staged_signatures: None,
            needs_signing: false,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn rtype(&self) -> RrType {
        self.rtype
    }

    /// Committed records, including those staged for deletion
    pub fn rr_count(&self) -> usize {
        self.records
            .iter()
            .filter(|rr| rr.state != RrState::PendingAdd)
            .count()
    }

    pub fn add_count(&self) -> usize {
        self.count_state(RrState::PendingAdd)
    }

    pub fn del_count(&self) -> usize {
        self.count_state(RrState::PendingDelete)
    }

    pub fn rrsig_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn needs_signing(&self) -> bool {
        self.needs_signing
    }

    pub fn signatures(&self) -> &[Rrsig] {
        &self.signatures
    }

    pub fn records(&self) -> &[Rr] {
        &self.records
    }

    fn count_state(&self, state: RrState) -> usize {
        self.records.iter().filter(|rr| rr.state == state).count()
    }

    /// Records as they will look after commit (current plus staged adds,
    /// minus staged deletes); this is the content that gets signed.
    pub fn signed_records(&self) -> impl Iterator<Item = &RecordData> {
        self.records
            .iter()
            .filter(|rr| rr.state != RrState::PendingDelete)
            .map(|rr| &rr.data)
    }

    /// Records in the committed view, ignoring staged additions
    pub fn committed_records(&self) -> impl Iterator<Item = &RecordData> {
        self.records
            .iter()
            .filter(|rr| rr.state != RrState::PendingAdd)
            .map(|rr| &rr.data)
    }

    /// Canonical signing input over the post-commit content
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_rrset_bytes(self.signed_records())
    }

    /// Stage a record for addition.
    ///
    /// Idempotent: re-adding a record that is already current or already
    /// staged returns the existing instance instead of duplicating it, and
    /// re-adding a record staged for deletion reverts the deletion. A
    /// TTL-only difference is absorbed into the stored record without
    /// changing its state.
    pub fn add_rr(&mut self, data: RecordData) -> &Rr {
        if let Some(idx) = self.find_rr(&data) {
            let rr = &mut self.records[idx];
            if rr.state == RrState::PendingDelete {
                trace!(owner = %self.owner, rtype = %self.rtype, "re-add reverts pending delete");
                rr.state = RrState::Current;
            }
            rr.data.set_ttl(data.ttl());
            return &self.records[idx];
        }

        self.records.push(Rr::new(data, RrState::PendingAdd));
        let idx = self.records.len() - 1;
        &self.records[idx]
    }

    /// Stage a record for deletion.
    ///
    /// Fails with `NotFound` if the record is not in the committed set and
    /// `allow_duplicate` is false; deleting twice is a silent no-op when
    /// `allow_duplicate` is true (bulk re-diff expects duplicate requests).
    pub fn delete_rr(&mut self, data: &RecordData, allow_duplicate: bool) -> Result<()> {
        match self.find_rr(data) {
            Some(idx) if self.records[idx].state == RrState::Current => {
                self.records[idx].state = RrState::PendingDelete;
                Ok(())
            }
            Some(idx) if self.records[idx].state == RrState::PendingDelete && allow_duplicate => {
                Ok(())
            }
            _ if allow_duplicate => Ok(()),
            _ => Err(RrsetError::NotFound {
                owner: self.owner.clone(),
                rtype: self.rtype,
            }),
        }
    }

    /// Stage every committed record for deletion; used when the whole RRset
    /// is withdrawn from the zone.
    pub fn wipe(&mut self) {
        for rr in &mut self.records {
            if rr.state == RrState::Current {
                rr.state = RrState::PendingDelete;
            }
        }
        debug!(owner = %self.owner, rtype = %self.rtype, "rrset wiped");
    }

    /// Reconcile the incoming record set against this RRset.
    ///
    /// Unseen records become pending additions, committed records absent
    /// from the input become pending deletions, unchanged records are left
    /// untouched (TTL-only changes are absorbed without forcing a re-sign).
    /// Returns whether the RRset needs (re)signing: true when staged changes
    /// alter the signed content, when a signature's key left the key list,
    /// when an applicable key has no signature yet, or when a signature is
    /// due for refresh.
    pub fn diff(
        &mut self,
        new_records: &[RecordData],
        key_list: &KeyList,
        now: DateTime<Utc>,
        refresh: chrono::Duration,
    ) -> bool {
        for data in new_records {
            self.add_rr(data.clone());
        }

        // Committed records missing from the input are withdrawn
        for rr in &mut self.records {
            if rr.state == RrState::Current
                && !new_records.iter().any(|data| data.signed_eq(&rr.data))
            {
                rr.state = RrState::PendingDelete;
            }
        }

        let changed = self.add_count() > 0 || self.del_count() > 0;
        let stale = self.stale_signatures(key_list, now, refresh);

        self.needs_signing = changed || stale;
        trace!(
            owner = %self.owner,
            rtype = %self.rtype,
            changed,
            stale,
            needs_signing = self.needs_signing,
            "rrset diffed"
        );
        self.needs_signing
    }

    fn stale_signatures(
        &self,
        key_list: &KeyList,
        now: DateTime<Utc>,
        refresh: chrono::Duration,
    ) -> bool {
        // A signature produced by a key that left the key list is stale
        if self
            .signatures
            .iter()
            .any(|sig| !key_list.contains_locator(&sig.key_locator))
        {
            return true;
        }

        // Every applicable key must have a fresh signature, unless the
        // RRset holds no signable content at all
        if self.signed_records().next().is_none() {
            return false;
        }
        for key in key_list.applicable(self.rtype) {
            match self
                .signatures
                .iter()
                .find(|sig| sig.key_locator == key.locator)
            {
                Some(sig) if !sig.needs_refresh(now, refresh) => {}
                _ => return true,
            }
        }
        false
    }

    /// Apply staged additions and deletions to the committed set.
    ///
    /// All-or-nothing: the post-commit record vector is fully built in a
    /// scratch buffer and swapped in only after every record has been
    /// staged, so a failure partway leaves the committed view unchanged.
    /// Signatures staged by a worker this pass are promoted here, so the
    /// live signature set always covers the committed content.
    pub fn commit(&mut self) -> CommitOutcome {
        let added = self.add_count();
        let deleted = self.del_count();

        let mut next = Vec::with_capacity(self.records.len().saturating_sub(deleted));
        for rr in &self.records {
            match rr.state {
                RrState::Current => next.push(rr.clone()),
                RrState::PendingAdd => next.push(Rr::new(rr.data.clone(), RrState::Current)),
                RrState::PendingDelete => {}
            }
        }

        self.records = next;
        if let Some(signatures) = self.staged_signatures.take() {
            self.signatures = signatures;
        }
        let empty = self.records.is_empty();
        if empty {
            // A fully withdrawn RRset keeps no signatures
            self.signatures.clear();
            self.needs_signing = false;
        }

        debug!(
            owner = %self.owner,
            rtype = %self.rtype,
            added,
            deleted,
            remaining = self.records.len(),
            "rrset committed"
        );
        CommitOutcome {
            added,
            deleted,
            empty,
        }
    }

    /// Discard staged changes without touching the committed set.
    ///
    /// Staged signatures are discarded too: they cover the staged content,
    /// and the committed view keeps the signature set that covers it.
    pub fn rollback(&mut self) {
        self.records.retain(|rr| rr.state != RrState::PendingAdd);
        for rr in &mut self.records {
            if rr.state == RrState::PendingDelete {
                rr.state = RrState::Current;
            }
        }
        self.staged_signatures = None;
        self.needs_signing = false;
        debug!(owner = %self.owner, rtype = %self.rtype, "rrset rolled back");
    }

    /// Stage the signature set produced by a signing worker; it covers the
    /// post-commit content and only replaces the live set on `commit`
    pub fn stage_signatures(&mut self, signatures: Vec<Rrsig>) {
        self.staged_signatures = Some(signatures);
        self.needs_signing = false;
    }

    /// Signatures staged by a worker this pass, if any
    pub fn staged_signatures(&self) -> Option<&[Rrsig]> {
        self.staged_signatures.as_deref()
    }

    /// Reattach a record from a backup log as committed content
    pub fn recover_rr(&mut self, data: RecordData) {
        if self.find_rr(&data).is_none() {
            self.records.push(Rr::new(data, RrState::Current));
        }
    }

    /// Reattach a signature from a backup log
    pub fn recover_rrsig(&mut self, rrsig: Rrsig) {
        self.signatures.push(rrsig);
    }

    fn find_rr(&self, data: &RecordData) -> Option<usize> {
        self.records.iter().position(|rr| rr.data.signed_eq(data))
    }
}
