// Copyright (c) James Kassemi, SC, US. All rights reserved.

use serde::{Deserialize, Serialize};

/// One receipt attachment pulled from the mailbox.
///
/// Receipts are ordered oldest first as they come out of the mailbox scan;
/// filenames are assumed chronological and unique.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub name: String,
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receipt")
            .field("name", &self.name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// One expense entry from the remote accounting ledger.
///
/// Entries arrive newest first and the order must be preserved as
/// received; the matching algorithm is order-sensitive.
///
/// `marker` is the entry's first line-item description. The remote system
/// uses that same field both for display and as the only durable record
/// that a receipt was attached: `Some` means a receipt is already on the
/// entry, `None` means the entry is open. There is no private database
/// behind this; the ledger itself is the durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub description: String,
    pub amount: i64,
    pub created_at: String,
    pub marker: Option<String>,
    pub item_id: String,
    pub tags: Vec<String>,
}

impl LedgerEntry {
    /// An open entry is still awaiting a receipt.
    pub fn is_open(&self) -> bool {
        self.marker.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_entry_has_no_marker() {
        let entry = LedgerEntry {
            id: "e1".to_string(),
            description: "office supplies".to_string(),
            amount: 1250,
            created_at: "2026-07-01T10:00:00Z".to_string(),
            marker: None,
            item_id: "i1".to_string(),
            tags: vec![],
        };
        assert!(entry.is_open());
        let attached = LedgerEntry {
            marker: Some("receipt-0001.pdf".to_string()),
            ..entry
        };
        assert!(!attached.is_open());
    }

    #[test]
    fn receipt_debug_hides_payload_bytes() {
        let receipt = Receipt {
            name: "receipt-0001.pdf".to_string(),
            payload: vec![0u8; 4096],
        };
        let rendered = format!("{:?}", receipt);
        assert!(rendered.contains("receipt-0001.pdf"));
        assert!(rendered.contains("4096"));
    }
}
