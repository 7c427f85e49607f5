//! Append-only ledger.
//!
//! Each wallet owns a [`Journal`] of entries. An entry records the signed
//! deltas it posts to the wallet's available and escrow balances together
//! with the resulting snapshot, so replaying posted entries in posting
//! order reproduces the wallet exactly. Entries are hash-chained per
//! wallet with BLAKE3 over their immutable fields.

use chrono::{DateTime, Utc};
use haulage_core::{DisputeId, EntryId, HoldId, Money, PaymentId, WalletId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SettlementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    EscrowHold,
    EscrowRelease,
    EscrowRefund,
    /// Platform revenue retained from a hold.
    Commission,
    TransferIn,
    TransferOut,
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::EscrowHold => "escrow_hold",
            Self::EscrowRelease => "escrow_release",
            Self::EscrowRefund => "escrow_refund",
            Self::Commission => "commission",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "deposit" => Self::Deposit,
            "withdrawal" => Self::Withdrawal,
            "escrow_hold" => Self::EscrowHold,
            "escrow_release" => Self::EscrowRelease,
            "escrow_refund" => Self::EscrowRefund,
            "commission" => Self::Commission,
            "transfer_in" => Self::TransferIn,
            "transfer_out" => Self::TransferOut,
            "adjustment" => Self::Adjustment,
            other => {
                return Err(SettlementError::Validation(format!(
                    "unknown entry kind: {other}"
                )))
            }
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reversed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Reversed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "reversed" => Self::Reversed,
            other => {
                return Err(SettlementError::Validation(format!(
                    "unknown entry status: {other}"
                )))
            }
        };
        Ok(status)
    }
}

/// The entity that justified an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntryReference {
    Hold(HoldId),
    Dispute(DisputeId),
    Payment(PaymentId),
    /// A compensating entry pointing at the entry it offsets.
    Entry(EntryId),
    Manual,
}

impl fmt::Display for EntryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold(id) => write!(f, "hold:{id}"),
            Self::Dispute(id) => write!(f, "dispute:{id}"),
            Self::Payment(id) => write!(f, "payment:{id}"),
            Self::Entry(id) => write!(f, "entry:{id}"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// One balance-affecting event on one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    /// Position in the wallet's journal (1-based, creation order).
    pub sequence: u64,
    /// Order in which the entry's deltas hit the balance; `None` while unposted.
    pub posting_sequence: Option<u64>,
    pub kind: EntryKind,
    pub amount: Money,
    pub fee: Money,
    pub net_amount: Money,
    /// Signed change to the available balance, in minor units.
    pub available_delta: i64,
    /// Signed change to the escrow balance, in minor units.
    pub escrow_delta: i64,
    pub available_after: u64,
    pub escrow_after: u64,
    pub status: EntryStatus,
    pub reference: EntryReference,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Hex BLAKE3 digest chained to the previous entry of the same wallet.
    pub digest: String,
}

impl LedgerEntry {
    pub fn is_posted(&self) -> bool {
        self.posting_sequence.is_some()
    }
}

/// Receives every appended or updated entry, e.g. to persist an audit journal.
pub trait EntrySink: Send + Sync {
    fn record(&self, entry: &LedgerEntry);
}

/// Side effect on a wallet's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tally {
    Deposited(u64),
    Withdrawn(u64),
    WithdrawalReversed(u64),
    Earned(u64),
}

/// An entry about to be written.
#[derive(Debug, Clone)]
pub(crate) struct EntryDraft {
    pub kind: EntryKind,
    pub amount: Money,
    pub fee: Money,
    pub net_amount: Money,
    pub available_delta: i64,
    pub escrow_delta: i64,
    pub status: EntryStatus,
    pub reference: EntryReference,
    pub description: String,
    pub tally: Option<Tally>,
    /// Compensating entries are accepted on frozen or closed wallets.
    pub compensating: bool,
}

impl EntryDraft {
    pub fn new(kind: EntryKind, amount: Money, reference: EntryReference) -> Self {
        Self {
            kind,
            amount,
            fee: Money::zero(amount.currency),
            net_amount: amount,
            available_delta: 0,
            escrow_delta: 0,
            status: EntryStatus::Completed,
            reference,
            description: String::new(),
            tally: None,
            compensating: false,
        }
    }

    pub fn available(mut self, delta: i64) -> Self {
        self.available_delta = delta;
        self
    }

    pub fn escrow(mut self, delta: i64) -> Self {
        self.escrow_delta = delta;
        self
    }

    pub fn fee(mut self, fee: Money, net_amount: Money) -> Self {
        self.fee = fee;
        self.net_amount = net_amount;
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tally(mut self, tally: Tally) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn compensating(mut self) -> Self {
        self.compensating = true;
        self
    }
}

/// Filters for transaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub kind: Option<EntryKind>,
    pub status: Option<EntryStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub newest_first: bool,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl HistoryQuery {
    pub const MAX_PER_PAGE: u32 = 100;

    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.map_or(true, |k| entry.kind == k)
            && self.status.map_or(true, |s| entry.status == s)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at < to)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            kind: None,
            status: None,
            from: None,
            to: None,
            newest_first: true,
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}

/// A wallet's ordered journal.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<LedgerEntry>,
    index: HashMap<EntryId, usize>,
    postings: u64,
    head: [u8; 32],
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, id: &EntryId) -> Option<&LedgerEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn append(
        &mut self,
        wallet_id: WalletId,
        draft: &EntryDraft,
        posted: bool,
        available_after: u64,
        escrow_after: u64,
    ) -> LedgerEntry {
        let now = Utc::now();
        let posting_sequence = if posted {
            self.postings += 1;
            Some(self.postings)
        } else {
            None
        };
        let mut entry = LedgerEntry {
            id: EntryId::new(),
            wallet_id,
            sequence: self.entries.len() as u64 + 1,
            posting_sequence,
            kind: draft.kind,
            amount: draft.amount,
            fee: draft.fee,
            net_amount: draft.net_amount,
            available_delta: draft.available_delta,
            escrow_delta: draft.escrow_delta,
            available_after,
            escrow_after,
            status: draft.status,
            reference: draft.reference,
            description: draft.description.clone(),
            created_at: now,
            completed_at: draft.status.is_final().then_some(now),
            digest: String::new(),
        };
        let digest = entry_digest(&self.head, &entry);
        entry.digest = hex::encode(digest);
        self.head = digest;

        self.index.insert(entry.id, self.entries.len());
        self.entries.push(entry.clone());
        entry
    }

    /// Post a previously unposted entry's deltas and record the new snapshot.
    pub(crate) fn mark_posted(
        &mut self,
        id: &EntryId,
        status: EntryStatus,
        available_after: u64,
        escrow_after: u64,
    ) -> Option<LedgerEntry> {
        let idx = *self.index.get(id)?;
        self.postings += 1;
        let entry = &mut self.entries[idx];
        entry.posting_sequence = Some(self.postings);
        entry.available_after = available_after;
        entry.escrow_after = escrow_after;
        entry.status = status;
        if status.is_final() {
            entry.completed_at = Some(Utc::now());
        }
        Some(entry.clone())
    }

    pub(crate) fn set_status(&mut self, id: &EntryId, status: EntryStatus) -> Option<LedgerEntry> {
        let idx = *self.index.get(id)?;
        let entry = &mut self.entries[idx];
        entry.status = status;
        if status.is_final() {
            entry.completed_at = Some(Utc::now());
        }
        Some(entry.clone())
    }

    /// Apply posted entries in posting order from a zero balance.
    ///
    /// Returns the final `(available, escrow)` or the sequence number of the
    /// first entry whose snapshot disagrees with the running balance.
    pub fn replay(&self) -> Result<(u64, u64), u64> {
        let mut posted: Vec<&LedgerEntry> = self.entries.iter().filter(|e| e.is_posted()).collect();
        posted.sort_by_key(|e| e.posting_sequence);

        let (mut available, mut escrow) = (0i128, 0i128);
        for entry in posted {
            available += entry.available_delta as i128;
            escrow += entry.escrow_delta as i128;
            if available < 0
                || escrow < 0
                || available != entry.available_after as i128
                || escrow != entry.escrow_after as i128
            {
                return Err(entry.sequence);
            }
        }
        Ok((available as u64, escrow as u64))
    }

    /// Recompute the digest chain; `false` if any entry was altered.
    pub fn verify_chain(&self) -> bool {
        let mut head = [0u8; 32];
        for entry in &self.entries {
            let digest = entry_digest(&head, entry);
            if hex::encode(digest) != entry.digest {
                return false;
            }
            head = digest;
        }
        true
    }

    pub fn query(&self, query: &HistoryQuery) -> Page<LedgerEntry> {
        let per_page = query.per_page.clamp(1, HistoryQuery::MAX_PER_PAGE);
        let page = query.page.max(1);

        let mut matching: Vec<&LedgerEntry> =
            self.entries.iter().filter(|e| query.matches(e)).collect();
        if query.newest_first {
            matching.reverse();
        }
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page as usize - 1) * per_page as usize)
            .take(per_page as usize)
            .cloned()
            .collect();

        Page {
            items,
            total,
            page,
            per_page,
        }
    }
}

fn entry_digest(prev: &[u8; 32], entry: &LedgerEntry) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(entry.id.as_uuid().as_bytes());
    hasher.update(entry.wallet_id.as_uuid().as_bytes());
    hasher.update(&entry.sequence.to_le_bytes());
    hasher.update(entry.kind.as_str().as_bytes());
    hasher.update(entry.amount.currency.code().as_bytes());
    hasher.update(&entry.amount.minor.to_le_bytes());
    hasher.update(&entry.fee.minor.to_le_bytes());
    hasher.update(&entry.net_amount.minor.to_le_bytes());
    hasher.update(&entry.available_delta.to_le_bytes());
    hasher.update(&entry.escrow_delta.to_le_bytes());
    hasher.update(entry.reference.to_string().as_bytes());
    hasher.update(&entry.created_at.timestamp_micros().to_le_bytes());
    *hasher.finalize().as_bytes()
}
