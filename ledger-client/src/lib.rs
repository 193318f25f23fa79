// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Ledger client: queries recent expense entries from the accounting API,
//! uploads receipt files, and issues the edit mutation that attaches a
//! receipt to an entry.

use async_trait::async_trait;
use core_types::config::LedgerConfig;
use core_types::types::LedgerEntry;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LedgerClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("ledger query failed: {0}")]
    Query(String),
    #[error("upload rejected: {0}")]
    UploadRejected(String),
    #[error("upload response unparsable: {0}")]
    UploadUnparsable(String),
    #[error("entry mutation failed: {0}")]
    Mutation(String),
}

/// One attach-receipt mutation: sets the entry's first line item
/// description and url, and replaces the entry's tag set.
#[derive(Debug, Clone)]
pub struct EntryUpdate {
    pub entry_id: String,
    pub item_id: String,
    pub amount: i64,
    pub tags: Vec<String>,
    pub description: String,
    pub url: String,
}

/// Collaborator contract for the accounting API.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Recent in-scope entries, newest first, as received.
    async fn fetch_entries(
        &self,
        account: &str,
        cards: &HashSet<String>,
    ) -> Result<Vec<LedgerEntry>, LedgerClientError>;

    /// Upload a receipt payload; returns the stored file's reference URL.
    async fn upload_file(&self, payload: &[u8], name: &str)
        -> Result<String, LedgerClientError>;

    /// Apply an attach-receipt mutation; returns the raw response body
    /// for cycle logging.
    async fn update_entry(&self, update: &EntryUpdate) -> Result<String, LedgerClientError>;
}

const ENTRY_QUERY: &str = r#"query RecentEntries($account: String!) {
  collective(slug: $account) {
    name
    transactions(type: DEBIT, limit: 100) {
      nodes {
        id
        legacyId
        createdAt
        isRefund
        isRefunded
        description
        type
        expense {
          id
          status
          description
          tags
          virtualCard { name }
          items { id amount description url }
        }
      }
    }
  }
}"#;

const ATTACH_MUTATION: &str = r#"mutation AttachReceipt($expense: ExpenseUpdateInput!) {
  editExpense(expense: $expense) {
    id
    tags
    items { id amount description url }
  }
}"#;

/// GraphQL-backed ledger client.
pub struct GraphqlLedgerClient {
    http: reqwest::Client,
    api_url: Url,
    upload_url: Url,
    origin: Option<String>,
}

impl GraphqlLedgerClient {
    pub fn new(http: reqwest::Client, cfg: &LedgerConfig) -> Result<Self, LedgerClientError> {
        // the API key rides in the path, per the remote API's convention
        let api_url = Url::parse(&format!(
            "{}/{}",
            cfg.api_endpoint.trim_end_matches('/'),
            cfg.api_key
        ))?;
        let upload_url = Url::parse(&cfg.upload_endpoint)?;
        Ok(Self {
            http,
            api_url,
            upload_url,
            origin: cfg.origin.clone(),
        })
    }
}

#[async_trait]
impl LedgerClient for GraphqlLedgerClient {
    async fn fetch_entries(
        &self,
        account: &str,
        cards: &HashSet<String>,
    ) -> Result<Vec<LedgerEntry>, LedgerClientError> {
        let body = json!({
            "query": ENTRY_QUERY,
            "variables": { "account": account },
        });
        let response: GraphqlResponse<EntriesData> = self
            .http
            .post(self.api_url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(errors) = response.errors {
            return Err(LedgerClientError::Query(join_errors(&errors)));
        }
        let collective = response
            .data
            .and_then(|data| data.collective)
            .ok_or_else(|| LedgerClientError::Query(format!("account {account} not found")))?;
        let entries = entries_from_nodes(collective.transactions.nodes, cards);
        debug!("fetched {} in-scope ledger entries", entries.len());
        Ok(entries)
    }

    async fn upload_file(
        &self,
        payload: &[u8],
        name: &str,
    ) -> Result<String, LedgerClientError> {
        let part = reqwest::multipart::Part::bytes(payload.to_vec()).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let mut request = self.http.post(self.upload_url.clone()).multipart(form);
        if let Some(origin) = &self.origin {
            request = request.header("Origin", origin);
        }
        let text = request.send().await?.text().await?;
        parse_upload_response(&text)
    }

    async fn update_entry(&self, update: &EntryUpdate) -> Result<String, LedgerClientError> {
        let body = json!({
            "query": ATTACH_MUTATION,
            "variables": {
                "expense": {
                    "id": update.entry_id,
                    "tags": update.tags,
                    "items": [{
                        "id": update.item_id,
                        "amount": update.amount,
                        "description": update.description,
                        "url": update.url,
                    }],
                },
            },
        });
        let text = self
            .http
            .post(self.api_url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        check_mutation_response(&text)?;
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct EntriesData {
    collective: Option<Collective>,
}

#[derive(Debug, Deserialize)]
struct Collective {
    transactions: TransactionPage,
}

#[derive(Debug, Deserialize)]
struct TransactionPage {
    nodes: Vec<TransactionNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionNode {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    is_refund: bool,
    #[serde(default)]
    is_refunded: bool,
    #[serde(default)]
    description: Option<String>,
    expense: Option<ExpenseNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpenseNode {
    id: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    virtual_card: Option<VirtualCard>,
    items: Vec<ExpenseItem>,
}

#[derive(Debug, Deserialize)]
struct VirtualCard {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpenseItem {
    id: String,
    amount: i64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: Option<i64>,
    url: Option<String>,
}

/// Map the wire transactions to ledger entries, preserving the received
/// newest-first order. Refunds and entries outside the card allowlist are
/// out of scope, as are entries without an expense or line item.
fn entries_from_nodes(
    nodes: Vec<TransactionNode>,
    cards: &HashSet<String>,
) -> Vec<LedgerEntry> {
    nodes
        .into_iter()
        .filter_map(|node| {
            if node.is_refund || node.is_refunded {
                return None;
            }
            let expense = node.expense?;
            let card = expense.virtual_card.as_ref()?.name.as_deref()?;
            if !cards.contains(card) {
                return None;
            }
            let item = expense.items.into_iter().next()?;
            Some(LedgerEntry {
                id: expense.id,
                description: node.description.unwrap_or_default(),
                amount: item.amount,
                created_at: node.created_at.unwrap_or_default(),
                marker: item.description.filter(|desc| !desc.is_empty()),
                item_id: item.id,
                tags: expense.tags.unwrap_or_default(),
            })
        })
        .collect()
}

/// The upload endpoint reports its own status inside the body, even when
/// the HTTP exchange itself succeeded.
fn parse_upload_response(body: &str) -> Result<String, LedgerClientError> {
    let parsed: UploadResponse = serde_json::from_str(body)
        .map_err(|_| LedgerClientError::UploadUnparsable(body.to_string()))?;
    if parsed.status != Some(200) {
        return Err(LedgerClientError::UploadRejected(body.to_string()));
    }
    parsed
        .url
        .ok_or_else(|| LedgerClientError::UploadRejected(body.to_string()))
}

fn check_mutation_response(body: &str) -> Result<(), LedgerClientError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|_| LedgerClientError::Mutation(body.to_string()))?;
    match value.get("errors") {
        None => Ok(()),
        Some(serde_json::Value::Null) => Ok(()),
        Some(serde_json::Value::Array(errors)) if errors.is_empty() => Ok(()),
        Some(_) => Err(LedgerClientError::Mutation(body.to_string())),
    }
}

fn join_errors(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|err| err.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Existing entry tags plus the configured set, first occurrence wins.
pub fn merge_tags(existing: &[String], configured: &[String]) -> Vec<String> {
    let mut merged = Vec::new();
    for tag in existing.iter().chain(configured) {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards() -> HashSet<String> {
        ["team card".to_string()].into_iter().collect()
    }

    #[test]
    fn entries_mapping_filters_and_extracts_markers() {
        let raw = json!({
            "data": {
                "collective": {
                    "transactions": {
                        "nodes": [
                            {
                                "id": "t1",
                                "createdAt": "2026-08-01T09:00:00Z",
                                "isRefund": false,
                                "isRefunded": false,
                                "description": "SaaS subscription",
                                "expense": {
                                    "id": "e1",
                                    "tags": ["infra"],
                                    "virtualCard": { "name": "team card" },
                                    "items": [
                                        { "id": "i1", "amount": 900, "description": null, "url": null }
                                    ]
                                }
                            },
                            {
                                "id": "t2",
                                "createdAt": "2026-07-30T09:00:00Z",
                                "isRefunded": true,
                                "expense": {
                                    "id": "e2",
                                    "virtualCard": { "name": "team card" },
                                    "items": [{ "id": "i2", "amount": 100 }]
                                }
                            },
                            {
                                "id": "t3",
                                "createdAt": "2026-07-28T09:00:00Z",
                                "expense": {
                                    "id": "e3",
                                    "virtualCard": { "name": "personal card" },
                                    "items": [{ "id": "i3", "amount": 200 }]
                                }
                            },
                            {
                                "id": "t4",
                                "createdAt": "2026-07-25T09:00:00Z",
                                "description": "domain renewal",
                                "expense": {
                                    "id": "e4",
                                    "virtualCard": { "name": "team card" },
                                    "items": [
                                        { "id": "i4", "amount": 1500, "description": "receipt-0009.pdf" }
                                    ]
                                }
                            }
                        ]
                    }
                }
            }
        });
        let response: GraphqlResponse<EntriesData> = serde_json::from_value(raw).unwrap();
        let nodes = response.data.unwrap().collective.unwrap().transactions.nodes;
        let entries = entries_from_nodes(nodes, &cards());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "e1");
        assert!(entries[0].is_open());
        assert_eq!(entries[0].tags, vec!["infra".to_string()]);
        assert_eq!(entries[1].id, "e4");
        assert_eq!(entries[1].marker.as_deref(), Some("receipt-0009.pdf"));
        assert_eq!(entries[1].amount, 1500);
        assert_eq!(entries[1].item_id, "i4");
    }

    #[test]
    fn empty_item_description_is_an_open_marker() {
        let raw = json!({
            "data": { "collective": { "transactions": { "nodes": [{
                "id": "t1",
                "expense": {
                    "id": "e1",
                    "virtualCard": { "name": "team card" },
                    "items": [{ "id": "i1", "amount": 100, "description": "" }]
                }
            }]}}}
        });
        let response: GraphqlResponse<EntriesData> = serde_json::from_value(raw).unwrap();
        let nodes = response.data.unwrap().collective.unwrap().transactions.nodes;
        let entries = entries_from_nodes(nodes, &cards());
        assert!(entries[0].is_open());
    }

    #[test]
    fn upload_response_embedded_status_must_be_200() {
        let ok = parse_upload_response(r#"{"status":200,"url":"https://files.example/r.pdf"}"#);
        assert_eq!(ok.unwrap(), "https://files.example/r.pdf");

        let rejected =
            parse_upload_response(r#"{"status":413,"error":"too large"}"#).unwrap_err();
        assert!(matches!(rejected, LedgerClientError::UploadRejected(_)));

        let unparsable = parse_upload_response("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(unparsable, LedgerClientError::UploadUnparsable(_)));
    }

    #[test]
    fn mutation_response_error_payload_is_a_failure() {
        assert!(check_mutation_response(r#"{"data":{"editExpense":{"id":"e1"}}}"#).is_ok());
        assert!(check_mutation_response(r#"{"data":null,"errors":null}"#).is_ok());
        let err =
            check_mutation_response(r#"{"errors":[{"message":"not allowed"}]}"#).unwrap_err();
        assert!(matches!(err, LedgerClientError::Mutation(_)));
    }

    #[test]
    fn merge_tags_is_an_order_preserving_union() {
        let existing = vec!["infra".to_string(), "receipts".to_string()];
        let configured = vec!["receipts".to_string(), "automated".to_string()];
        assert_eq!(
            merge_tags(&existing, &configured),
            vec![
                "infra".to_string(),
                "receipts".to_string(),
                "automated".to_string()
            ]
        );
    }
}
