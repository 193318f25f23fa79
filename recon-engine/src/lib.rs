//! Reconciliation engine: computes the submission watermark from the
//! ledger, determines which mailed receipts are unsent, aligns them with
//! open ledger entries, and drives the upload + mutation per pair.

use async_trait::async_trait;
use core_types::cycle::CycleLog;
use core_types::types::{LedgerEntry, Receipt};
use ledger_client::{merge_tags, EntryUpdate, LedgerClient, LedgerClientError};
use log::info;
use mail_source::{MailFilter, MailSource, MailSourceError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("mail source: {0}")]
    Mail(#[from] MailSourceError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerClientError),
}

/// Seam between the engine and the polling supervisor.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Run one reconciliation pass. `Ok(true)` iff at least one receipt
    /// was newly attached to a ledger entry.
    async fn reconcile(&self, log: &mut CycleLog) -> Result<bool, ReconError>;
}

pub struct ReconEngine {
    mail: Arc<dyn MailSource>,
    ledger: Arc<dyn LedgerClient>,
    filter: MailFilter,
    account: String,
    cards: HashSet<String>,
    tags: Vec<String>,
}

impl ReconEngine {
    pub fn new(
        mail: Arc<dyn MailSource>,
        ledger: Arc<dyn LedgerClient>,
        filter: MailFilter,
        account: impl Into<String>,
        cards: HashSet<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            mail,
            ledger,
            filter,
            account: account.into(),
            cards,
            tags,
        }
    }

    async fn submit_pair(
        &self,
        entry: &LedgerEntry,
        receipt: &Receipt,
        log: &mut CycleLog,
    ) -> Result<(), ReconError> {
        log.push(format!(
            "send {} to entry {} ({}, {})",
            receipt.name, entry.id, entry.description, entry.created_at
        ));
        let url = self.ledger.upload_file(&receipt.payload, &receipt.name).await?;
        log.push(format!("uploaded {} -> {}", receipt.name, url));
        let update = EntryUpdate {
            entry_id: entry.id.clone(),
            item_id: entry.item_id.clone(),
            amount: entry.amount,
            tags: merge_tags(&entry.tags, &self.tags),
            description: receipt.name.clone(),
            url,
        };
        log.push(format!("mutation: {:?}", update));
        let response = self.ledger.update_entry(&update).await?;
        log.push(format!("mutation response: {}", response));
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReconEngine {
    async fn reconcile(&self, log: &mut CycleLog) -> Result<bool, ReconError> {
        log.push("checking for new receipts");
        let entries = self.ledger.fetch_entries(&self.account, &self.cards).await?;

        let Some(watermark) = find_watermark(&entries) else {
            log.push("no ledger entry carries a receipt marker; nothing to do");
            info!("no watermark found, skipping cycle");
            return Ok(false);
        };
        let watermark = watermark.to_string();
        log.push(format!("last submitted receipt: {}", watermark));

        let receipts = self.mail.fetch_receipts(&self.filter).await?;
        let unsent = unsent_receipts(&receipts, &watermark);
        if unsent.is_empty() {
            info!("no unsent receipts newer than {}", watermark);
            return Ok(false);
        }
        log.push(format!("{} unsent receipt(s)", unsent.len()));

        let pairs = align(&entries, unsent);
        if pairs.is_empty() {
            log.push("no open ledger entries to attach to");
            info!("{} unsent receipt(s) but no open entries", unsent.len());
            return Ok(false);
        }

        // Older pairs commit first so the watermark, which is the marker of
        // the newest marked entry, never advances past a receipt that is
        // not attached yet; a failure mid-run leaves the tail resumable.
        for (entry, receipt) in pairs.iter().rev() {
            self.submit_pair(entry, receipt, log).await?;
        }
        info!("attached {} receipt(s)", pairs.len());
        Ok(true)
    }
}

/// The watermark is the marker of the newest entry that has one,
/// scanning in the received newest-to-oldest order.
fn find_watermark(entries: &[LedgerEntry]) -> Option<&str> {
    entries.iter().find_map(|entry| entry.marker.as_deref())
}

/// Receipts strictly newer than the watermark, oldest first.
///
/// A single receipt whose name differs from the watermark counts as
/// unsent even without finding the watermark itself: mailbox history may
/// have rolled off, leaving only the newest unsubmitted item visible.
/// Otherwise the watermark is searched from the newest-but-one position
/// backward; if it is absent nothing is actionable, since guessing could
/// double-submit.
fn unsent_receipts<'a>(receipts: &'a [Receipt], watermark: &str) -> &'a [Receipt] {
    if receipts.len() == 1 {
        if receipts[0].name != watermark {
            return receipts;
        }
        return &[];
    }
    for i in (0..receipts.len().saturating_sub(1)).rev() {
        if receipts[i].name == watermark {
            return &receipts[i + 1..];
        }
    }
    &[]
}

/// Reverse zip: the newest open entry takes the newest unsent receipt,
/// the next open entry the next-newest receipt, and so on outward until
/// either side runs out. Pairs are returned in entry-scan order, newest
/// first.
fn align<'a>(
    entries: &'a [LedgerEntry],
    unsent: &'a [Receipt],
) -> Vec<(&'a LedgerEntry, &'a Receipt)> {
    let mut next = unsent.len();
    let mut pairs = Vec::new();
    for entry in entries {
        if !entry.is_open() {
            continue;
        }
        if next == 0 {
            break;
        }
        next -= 1;
        pairs.push((entry, &unsent[next]));
    }
    pairs
}
