// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Mail source: scans a mailbox over IMAP/TLS and extracts receipt
//! attachments that pass the configured sender/subject/filename filters.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use core_types::config::MailConfig;
use core_types::types::Receipt;
use log::{debug, info};
use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail};
use native_tls::TlsConnector;
use std::collections::HashSet;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailSourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve mail host {0}")]
    Resolve(String),
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    #[error("imap error: {0}")]
    Imap(#[from] imap::Error),
    #[error("mail parse error: {0}")]
    Parse(#[from] MailParseError),
    #[error("mail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Boundary filters applied before receipts are sequenced. A message or
/// attachment that fails any of these never reaches the engine.
#[derive(Debug, Clone)]
pub struct MailFilter {
    pub senders: HashSet<String>,
    pub subject_prefix: String,
    pub name_prefix: String,
    pub lookback: ChronoDuration,
}

impl MailFilter {
    pub fn from_config(cfg: &MailConfig) -> Self {
        Self {
            senders: cfg.senders.iter().cloned().collect(),
            subject_prefix: cfg.subject_prefix.clone(),
            name_prefix: cfg.receipt_prefix.clone(),
            lookback: ChronoDuration::days(cfg.lookback_days),
        }
    }

    fn sender_allowed(&self, from: &str) -> bool {
        self.senders.contains(from.trim())
    }
}

/// Collaborator contract: return receipt attachments from recent mail,
/// oldest first, already filtered.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_receipts(&self, filter: &MailFilter) -> Result<Vec<Receipt>, MailSourceError>;
}

/// IMAP-backed mail source. All protocol work is blocking and runs on the
/// blocking pool; only the connect/auth phase carries a timeout.
#[derive(Clone)]
pub struct ImapMailSource {
    host: String,
    port: u16,
    user: String,
    password: String,
    accept_invalid_certs: bool,
    connect_timeout: Duration,
}

impl ImapMailSource {
    pub fn new(cfg: &MailConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            accept_invalid_certs: cfg.accept_invalid_certs,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
        }
    }

    fn fetch_blocking(&self, filter: &MailFilter) -> Result<Vec<Receipt>, MailSourceError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MailSourceError::Resolve(self.host.clone()))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;
        let stream = tls
            .connect(&self.host, tcp)
            .map_err(|err| MailSourceError::Handshake(err.to_string()))?;

        let client = imap::Client::new(stream);
        let mut session = client
            .login(&self.user, &self.password)
            .map_err(|(err, _client)| MailSourceError::Imap(err))?;
        session.select("INBOX")?;

        let since = (Utc::now() - filter.lookback).format("%d-%b-%Y");
        let mut seqs: Vec<u32> = session
            .search(format!("SINCE {}", since))?
            .into_iter()
            .collect();
        // ascending sequence order keeps receipts oldest first
        seqs.sort_unstable();
        debug!("mailbox scan matched {} messages", seqs.len());

        let mut receipts = Vec::new();
        for seq in seqs {
            let fetches = session.fetch(seq.to_string(), "RFC822")?;
            for message in fetches.iter() {
                let Some(body) = message.body() else {
                    continue;
                };
                let parsed = mailparse::parse_mail(body)?;
                receipts.extend(receipts_from_message(&parsed, filter)?);
            }
        }
        session.logout().ok();
        info!("collected {} receipt attachments from mail", receipts.len());
        Ok(receipts)
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_receipts(&self, filter: &MailFilter) -> Result<Vec<Receipt>, MailSourceError> {
        let source = self.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || source.fetch_blocking(&filter)).await?
    }
}

/// Extract the receipt attachments of one parsed message, applying the
/// sender, subject, and filename filters.
fn receipts_from_message(
    message: &ParsedMail<'_>,
    filter: &MailFilter,
) -> Result<Vec<Receipt>, MailParseError> {
    let headers = message.get_headers();
    let from = headers.get_first_value("From").unwrap_or_default();
    let subject = headers.get_first_value("Subject").unwrap_or_default();

    if !filter.sender_allowed(&from) {
        debug!("skipping mail from unlisted sender {}", from.trim());
        return Ok(Vec::new());
    }
    if !subject.starts_with(&filter.subject_prefix) {
        debug!("skipping mail with unmatched subject {:?}", subject);
        return Ok(Vec::new());
    }

    let mut receipts = Vec::new();
    collect_attachments(message, &filter.name_prefix, &mut receipts)?;
    Ok(receipts)
}

fn collect_attachments(
    part: &ParsedMail<'_>,
    name_prefix: &str,
    out: &mut Vec<Receipt>,
) -> Result<(), MailParseError> {
    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        if let Some(name) = disposition.params.get("filename") {
            if name.starts_with(name_prefix) {
                out.push(Receipt {
                    name: name.clone(),
                    payload: part.get_body_raw()?,
                });
            }
        }
    }
    for sub in &part.subparts {
        collect_attachments(sub, name_prefix, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> MailFilter {
        MailFilter {
            senders: ["Receipts <receipts@vendor.example>".to_string()]
                .into_iter()
                .collect(),
            subject_prefix: "[receipt]".to_string(),
            name_prefix: "receipt-".to_string(),
            lookback: ChronoDuration::days(60),
        }
    }

    fn message(from: &str, subject: &str, filename: &str) -> Vec<u8> {
        format!(
            "From: {from}\r\n\
             Subject: {subject}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n\
             --XYZ\r\n\
             Content-Type: text/plain\r\n\r\n\
             receipt attached\r\n\
             --XYZ\r\n\
             Content-Type: application/pdf\r\n\
             Content-Disposition: attachment; filename=\"{filename}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             dGVzdC1wYXlsb2Fk\r\n\
             --XYZ--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn extracts_matching_attachment() {
        let raw = message(
            "Receipts <receipts@vendor.example>",
            "[receipt] March card statement",
            "receipt-0012.pdf",
        );
        let parsed = mailparse::parse_mail(&raw).unwrap();
        let receipts = receipts_from_message(&parsed, &filter()).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].name, "receipt-0012.pdf");
        assert_eq!(receipts[0].payload, b"test-payload");
    }

    #[test]
    fn skips_unlisted_sender() {
        let raw = message(
            "Spoof <spoof@other.example>",
            "[receipt] March card statement",
            "receipt-0012.pdf",
        );
        let parsed = mailparse::parse_mail(&raw).unwrap();
        assert!(receipts_from_message(&parsed, &filter()).unwrap().is_empty());
    }

    #[test]
    fn skips_unmatched_subject_prefix() {
        let raw = message(
            "Receipts <receipts@vendor.example>",
            "fwd: something else",
            "receipt-0012.pdf",
        );
        let parsed = mailparse::parse_mail(&raw).unwrap();
        assert!(receipts_from_message(&parsed, &filter()).unwrap().is_empty());
    }

    #[test]
    fn skips_attachment_without_name_prefix() {
        let raw = message(
            "Receipts <receipts@vendor.example>",
            "[receipt] March card statement",
            "invoice-0012.pdf",
        );
        let parsed = mailparse::parse_mail(&raw).unwrap();
        assert!(receipts_from_message(&parsed, &filter()).unwrap().is_empty());
    }

    #[test]
    fn sender_match_ignores_surrounding_whitespace() {
        let f = filter();
        assert!(f.sender_allowed("  Receipts <receipts@vendor.example> "));
        assert!(!f.sender_allowed("receipts@vendor.example"));
    }
}
