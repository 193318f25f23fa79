use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Config structure with the service's key knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Mailbox connection plus the three receipt filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Exact `From` header values allowed to emit receipts.
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub subject_prefix: String,
    /// Attachment filename prefix identifying a receipt.
    #[serde(default)]
    pub receipt_prefix: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_imap_port() -> u16 {
    993
}

fn default_lookback_days() -> i64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    3
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_imap_port(),
            user: String::new(),
            password: String::new(),
            accept_invalid_certs: false,
            senders: Vec::new(),
            subject_prefix: String::new(),
            receipt_prefix: String::new(),
            lookback_days: default_lookback_days(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Accounting API endpoints and the entry filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub api_endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// Account slug whose entries are reconciled.
    #[serde(default)]
    pub account: String,
    /// Card names whose entries are in scope.
    #[serde(default)]
    pub cards: Vec<String>,
    #[serde(default)]
    pub upload_endpoint: String,
    /// Origin header sent with uploads, when the endpoint requires one.
    #[serde(default)]
    pub origin: Option<String>,
    /// Tags added to every entry the service updates.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            api_key: String::new(),
            account: String::new(),
            cards: Vec::new(),
            upload_endpoint: String::new(),
            origin: None,
            tags: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Operator notification channel. Disabled when token or chat id is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_bot_api_base")]
    pub api_base: String,
}

fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_bot_api_base(),
        }
    }
}

/// Liveness push monitor. Disabled when unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthConfig {
    #[serde(default)]
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive reconcile failures before the log batch is flushed as
    /// an error notification.
    #[serde(default = "default_error_burst_threshold")]
    pub error_burst_threshold: u32,
}

fn default_interval_secs() -> u64 {
    900
}

fn default_error_burst_threshold() -> u32 {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            error_burst_threshold: default_error_burst_threshold(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (value, name) in [
            (&self.mail.host, "mail.host"),
            (&self.mail.user, "mail.user"),
            (&self.mail.password, "mail.password"),
            (&self.ledger.api_endpoint, "ledger.api_endpoint"),
            (&self.ledger.api_key, "ledger.api_key"),
            (&self.ledger.account, "ledger.account"),
            (&self.ledger.upload_endpoint, "ledger.upload_endpoint"),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Message(format!("{} is required", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_optional_sections() {
        let config = AppConfig::default();
        assert_eq!(config.mail.port, 993);
        assert_eq!(config.mail.lookback_days, 60);
        assert_eq!(config.poll.interval_secs, 900);
        assert_eq!(config.poll.error_burst_threshold, 3);
        assert!(config.notify.bot_token.is_none());
        assert!(config.health.push_url.is_none());
    }

    #[test]
    fn validate_rejects_missing_required_fields() {
        let config = AppConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mail.host"));

        let mut config = AppConfig::default();
        config.mail.host = "imap.example.net".to_string();
        config.mail.user = "receipts@example.net".to_string();
        config.mail.password = "hunter2".to_string();
        config.ledger.api_endpoint = "https://ledger.example/api/graphql/v2".to_string();
        config.ledger.api_key = "key".to_string();
        config.ledger.account = "acme".to_string();
        config.ledger.upload_endpoint = "https://ledger.example/api/files".to_string();
        assert!(config.validate().is_ok());
    }
}
