//! Application configuration module
//! Loads every setting from the environment once at startup; the resulting
//! structs are injected into gateways, services and workers.

use crate::payments::signature::CashierCredentials;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when `DATABASE_URL` is unset; the in-memory store is used instead.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub providers: ProviderConfig,
    pub timeouts: TimeoutConfig,
    pub settings: ReconciliationSettings,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL used to build provider callback URLs.
    pub public_base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Credentials and endpoints for every external gateway. Sections are optional:
/// a gateway whose section is missing fails with a configuration error when it
/// is selected, before any external call.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub connect: Option<ConnectConfig>,
    pub feexpay: Option<FeexpayConfig>,
    pub platform_api: Option<PlatformApiConfig>,
    pub legacy_cashier: LegacyCashierConfig,
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub base_url: String,
    pub identifier: String,
    pub password: String,
    pub token_lifetime_hours: i64,
    pub wave_default_link: Option<String>,
    pub orange_default_link: Option<String>,
    pub mtn_default_link: Option<String>,
    pub recipient_label: String,
}

#[derive(Debug, Clone)]
pub struct FeexpayConfig {
    pub base_url: String,
    pub api_key: String,
    pub shop_id: String,
}

#[derive(Debug, Clone)]
pub struct PlatformApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub platform_uids: HashMap<String, String>,
}

/// Cashdesk base URL plus the credentials registered per platform id.
#[derive(Debug, Clone, Default)]
pub struct LegacyCashierConfig {
    pub base_url: String,
    pub platforms: HashMap<String, CashierCredentials>,
}

impl LegacyCashierConfig {
    pub fn credentials_for(&self, platform_id: &str) -> Option<&CashierCredentials> {
        self.platforms.get(&platform_id.trim().to_lowercase())
    }
}

/// Hard timeouts applied to provider calls.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub default: Duration,
    pub deposit: Duration,
    pub payout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            deposit: Duration::from_secs(45),
            payout: Duration::from_secs(120),
        }
    }
}

/// Business thresholds and switches read by the orchestrator.
#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    pub minimum_deposit: i64,
    pub minimum_withdrawal: i64,
    pub reward_mini_withdrawal: i64,
    /// Referral bonus percentage of the referred user's transaction amount.
    pub bonus_percent: f64,
    pub referral_bonus: bool,
    pub deposit_reward: bool,
    pub deposit_reward_percent: f64,
    /// Low-balance alert threshold for platform ledgers.
    pub minimum_solde: Option<i64>,
    pub mtn_not_fee: bool,
    pub moov_not_fee: bool,
    /// When false, payouts are left to operators after the platform debit.
    pub can_withdrawal: bool,
    pub admin_recipient: String,
    pub callback_base_url: String,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            minimum_deposit: 200,
            minimum_withdrawal: 500,
            reward_mini_withdrawal: 500,
            bonus_percent: 5.0,
            referral_bonus: true,
            deposit_reward: true,
            deposit_reward_percent: 1.0,
            minimum_solde: None,
            mtn_not_fee: false,
            moov_not_fee: false,
            can_withdrawal: true,
            admin_recipient: "admin".to_string(),
            callback_base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Background worker cadence.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub poll_batch_size: i64,
    pub follow_up_grace: Duration,
    pub webhook_retry_interval: Duration,
    pub webhook_max_retries: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            poll_batch_size: 50,
            follow_up_grace: Duration::from_secs(300),
            webhook_retry_interval: Duration::from_secs(60),
            webhook_max_retries: 5,
        }
    }
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        _ => Ok(default),
    }
}

fn flag_or(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(name.to_string())),
        },
        _ => Ok(default),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses `code:value,code:value` lists; codes are lowercased.
fn parse_pairs(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut pairs = HashMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (code, value) = item
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidValue(format!("malformed pair '{}'", item)))?;
        pairs.insert(code.trim().to_lowercase(), value.trim().to_string());
    }
    Ok(pairs)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let mut settings = ReconciliationSettings::from_env()?;
        settings.callback_base_url = server.public_base_url.clone();

        Ok(AppConfig {
            server,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            providers: ProviderConfig::from_env()?,
            timeouts: TimeoutConfig::from_env()?,
            settings,
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.timeouts.validate()?;
        self.settings.validate()?;
        self.workers.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parsed_or("SERVER_PORT", 8000)?;
        let public_base_url = optional("BASE_URL")
            .unwrap_or_else(|| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        Ok(ServerConfig {
            host,
            port,
            public_base_url,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(url) = optional("DATABASE_URL") else {
            return Ok(None);
        };

        Ok(Some(DatabaseConfig {
            url,
            max_connections: parsed_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: parsed_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: parsed_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let connect = match (optional("CONNECT_PRO_IDENTIFIER"), optional("CONNECT_PRO_PASSWORD")) {
            (Some(identifier), Some(password)) => Some(ConnectConfig {
                base_url: optional("CONNECT_PRO_BASE_URL")
                    .unwrap_or_else(|| "https://connect.turaincash.com".to_string()),
                identifier,
                password,
                token_lifetime_hours: parsed_or("CONNECT_PRO_TOKEN_LIFETIME_HOURS", 23)?,
                wave_default_link: optional("WAVE_DEFAULT_LINK"),
                orange_default_link: optional("ORANGE_DEFAULT_LINK"),
                mtn_default_link: optional("MTN_DEFAULT_LINK"),
                recipient_label: optional("CONNECT_PRO_LABEL")
                    .unwrap_or_else(|| "Mobcash".to_string()),
            }),
            _ => None,
        };

        let feexpay = match (optional("FEEXPAY_API_KEY"), optional("FEEXPAY_CUSTOMER_ID")) {
            (Some(api_key), Some(shop_id)) => Some(FeexpayConfig {
                base_url: optional("FEEXPAY_BASE_URL")
                    .unwrap_or_else(|| "https://api.feexpay.me".to_string()),
                api_key,
                shop_id,
            }),
            _ => None,
        };

        let platform_api = match (
            optional("MOBCASHAPI_BASE_URL"),
            optional("MOBCASHAPI_API_KEY"),
            optional("MOBCASHAPI_API_SECRET"),
        ) {
            (Some(base_url), Some(api_key), Some(api_secret)) => Some(PlatformApiConfig {
                base_url,
                api_key,
                api_secret,
                platform_uids: parse_pairs(
                    &optional("MOBCASHAPI_PLATFORM_UIDS").unwrap_or_default(),
                )?,
            }),
            _ => None,
        };

        Ok(ProviderConfig {
            connect,
            feexpay,
            platform_api,
            legacy_cashier: LegacyCashierConfig::from_env()?,
        })
    }
}

impl LegacyCashierConfig {
    /// `CASHDESK_PLATFORMS=1xbet,melbet` then `CASHDESK_1XBET_HASH`,
    /// `CASHDESK_1XBET_CASHIERPASS`, `CASHDESK_1XBET_CASHDESKID` per platform.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut platforms = HashMap::new();
        let listed = optional("CASHDESK_PLATFORMS").unwrap_or_default();
        for platform in listed.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let prefix = format!(
                "CASHDESK_{}",
                platform.to_uppercase().replace(['-', ' '], "_")
            );
            let read = |suffix: &str| {
                let name = format!("{}_{}", prefix, suffix);
                optional(&name).ok_or(ConfigError::MissingVariable(name))
            };
            platforms.insert(
                platform.to_lowercase(),
                CashierCredentials {
                    hash: read("HASH")?,
                    cashier_pass: read("CASHIERPASS")?,
                    cashdesk_id: read("CASHDESKID")?,
                },
            );
        }

        Ok(LegacyCashierConfig {
            base_url: optional("CASHDESK_BASE_URL").unwrap_or_else(|| {
                crate::payments::providers::legacy_cashier::DEFAULT_CASHDESK_BASE_URL.to_string()
            }),
            platforms,
        })
    }
}

impl TimeoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TimeoutConfig::default();
        Ok(TimeoutConfig {
            default: Duration::from_secs(parsed_or(
                "PROVIDER_TIMEOUT_SECS",
                defaults.default.as_secs(),
            )?),
            deposit: Duration::from_secs(parsed_or(
                "PROVIDER_DEPOSIT_TIMEOUT_SECS",
                defaults.deposit.as_secs(),
            )?),
            payout: Duration::from_secs(parsed_or(
                "PROVIDER_PAYOUT_TIMEOUT_SECS",
                defaults.payout.as_secs(),
            )?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("PROVIDER_TIMEOUT_SECS", self.default),
            ("PROVIDER_DEPOSIT_TIMEOUT_SECS", self.deposit),
            ("PROVIDER_PAYOUT_TIMEOUT_SECS", self.payout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }
        Ok(())
    }
}

impl ReconciliationSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = ReconciliationSettings::default();
        Ok(ReconciliationSettings {
            minimum_deposit: parsed_or("MINIMUM_DEPOSIT", d.minimum_deposit)?,
            minimum_withdrawal: parsed_or("MINIMUM_WITHDRAWAL", d.minimum_withdrawal)?,
            reward_mini_withdrawal: parsed_or("REWARD_MINI_WITHDRAWAL", d.reward_mini_withdrawal)?,
            bonus_percent: parsed_or("BONUS_PERCENT", d.bonus_percent)?,
            referral_bonus: flag_or("REFERRAL_BONUS", d.referral_bonus)?,
            deposit_reward: flag_or("DEPOSIT_REWARD", d.deposit_reward)?,
            deposit_reward_percent: parsed_or("DEPOSIT_REWARD_PERCENT", d.deposit_reward_percent)?,
            minimum_solde: match optional("MINIMUM_SOLDE") {
                Some(raw) => Some(
                    raw.trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("MINIMUM_SOLDE".to_string()))?,
                ),
                None => None,
            },
            mtn_not_fee: flag_or("MTN_NOT_FEE", d.mtn_not_fee)?,
            moov_not_fee: flag_or("MOOV_NOT_FEE", d.moov_not_fee)?,
            can_withdrawal: flag_or("CAN_WITHDRAWAL", d.can_withdrawal)?,
            admin_recipient: optional("ADMIN_CHAT_ID").unwrap_or(d.admin_recipient),
            callback_base_url: d.callback_base_url,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minimum_deposit <= 0 || self.minimum_withdrawal <= 0 {
            return Err(ConfigError::ValidationFailed(
                "minimum amounts must be positive".to_string(),
            ));
        }
        for (name, percent) in [
            ("BONUS_PERCENT", self.bonus_percent),
            ("DEPOSIT_REWARD_PERCENT", self.deposit_reward_percent),
        ] {
            if !(0.0..=crate::services::bonus::BONUS_PERCENT_MAX).contains(&percent) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be between 0 and {}",
                    name,
                    crate::services::bonus::BONUS_PERCENT_MAX
                )));
            }
        }
        Ok(())
    }

    pub fn callback_url(&self, path: &str) -> String {
        format!("{}/{}", self.callback_base_url, path.trim_start_matches('/'))
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = WorkerConfig::default();
        Ok(WorkerConfig {
            poll_interval: Duration::from_secs(parsed_or(
                "POLL_INTERVAL_SECS",
                d.poll_interval.as_secs(),
            )?),
            poll_batch_size: parsed_or("POLL_BATCH_SIZE", d.poll_batch_size)?,
            follow_up_grace: Duration::from_secs(parsed_or(
                "FOLLOW_UP_GRACE_SECS",
                d.follow_up_grace.as_secs(),
            )?),
            webhook_retry_interval: Duration::from_secs(parsed_or(
                "WEBHOOK_RETRY_INTERVAL_SECS",
                d.webhook_retry_interval.as_secs(),
            )?),
            webhook_max_retries: parsed_or("WEBHOOK_MAX_RETRIES", d.webhook_max_retries)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() || self.webhook_retry_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "worker intervals must be non-zero".to_string(),
            ));
        }
        if self.poll_batch_size <= 0 {
            return Err(ConfigError::InvalidValue("POLL_BATCH_SIZE".to_string()));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
