use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Closed set of gateway variants. Two of them (legacy cashier and the external
/// platform API) talk to the betting platform; the others move mobile money.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    LegacyCashier,
    ExternalPlatform,
    ConnectLink,
    ConnectUssd,
    Feexpay,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::LegacyCashier => "legacy_cashier",
            ProviderName::ExternalPlatform => "external_platform",
            ProviderName::ConnectLink => "connect_link",
            ProviderName::ConnectUssd => "connect_ussd",
            ProviderName::Feexpay => "feexpay",
        }
    }

    /// True for the gateways that credit or debit a player on the betting platform.
    pub fn is_platform_cashier(&self) -> bool {
        matches!(
            self,
            ProviderName::LegacyCashier | ProviderName::ExternalPlatform
        )
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "legacy_cashier" | "cashdesk" => Ok(ProviderName::LegacyCashier),
            "external_platform" | "mobcash" => Ok(ProviderName::ExternalPlatform),
            "connect_link" => Ok(ProviderName::ConnectLink),
            "connect_ussd" | "connect" | "connect_pro" => Ok(ProviderName::ConnectUssd),
            "feexpay" => Ok(ProviderName::Feexpay),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Which mobile-money API a network is wired to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkApi {
    Connect,
    Feexpay,
}

/// Snapshot of the carrier a transaction runs on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Lowercase carrier name: `wave`, `mtn`, `moov`, `orange`, `sbin`, `celtiis`.
    pub name: String,
    pub country_code: String,
    pub deposit_api: NetworkApi,
    pub withdrawal_api: NetworkApi,
    #[serde(default)]
    pub payment_by_link: bool,
    #[serde(default)]
    pub customer_pays_fee: bool,
    #[serde(default)]
    pub manual_processing: bool,
}

impl NetworkProfile {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn in_country(&self, country_code: &str) -> bool {
        self.country_code.eq_ignore_ascii_case(country_code)
    }

    /// Code used by the Connect networks listing, e.g. `MTN-CI`.
    pub fn connect_code(&self) -> String {
        format!(
            "{}-{}",
            self.name.to_uppercase(),
            self.country_code.to_uppercase()
        )
    }
}

/// Canonical provider status. Every provider vocabulary is folded into this
/// enum at the gateway boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl PaymentState {
    pub fn from_provider_status(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "success" | "successful" | "succeeded" | "confirmed" | "completed" | "accept" => {
                PaymentState::Success
            }
            "failed" | "failure" | "error" | "rejected" | "declined" => PaymentState::Failed,
            "cancelled" | "canceled" => PaymentState::Cancelled,
            "timeout" | "expired" => PaymentState::Timeout,
            _ => PaymentState::Pending,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentState::Pending)
    }
}

/// Normalized result every gateway operation returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub success: bool,
    pub state: PaymentState,
    pub provider_transaction_id: Option<String>,
    pub raw_message: Option<String>,
    /// Redirect/payment link for link-based collections.
    pub payment_link: Option<String>,
    /// Amount reported back by the provider, when it reports one.
    pub amount: Option<i64>,
    pub raw: JsonValue,
}

impl ProviderOutcome {
    pub fn accepted(provider_transaction_id: Option<String>, raw: JsonValue) -> Self {
        Self {
            success: true,
            state: PaymentState::Pending,
            provider_transaction_id,
            raw_message: None,
            payment_link: None,
            amount: None,
            raw,
        }
    }

    pub fn with_state(mut self, state: PaymentState) -> Self {
        self.state = state;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.raw_message = message;
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.payment_link = link;
        self
    }

    pub fn with_amount(mut self, amount: Option<i64>) -> Self {
        self.amount = amount;
        self
    }
}

/// Collection from a phone (mobile money) or credit of a player (platform).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub reference: String,
    pub amount: i64,
    pub phone_number: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub network: NetworkProfile,
    pub player_id: String,
    pub platform_id: String,
}

/// Payout to a phone (mobile money) or debit of a player with a withdrawal code (platform).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub reference: String,
    pub amount: i64,
    pub phone_number: String,
    pub customer_name: String,
    pub network: NetworkProfile,
    pub player_id: String,
    pub platform_id: String,
    pub withdrawal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountQuery {
    pub player_id: String,
    pub platform_id: String,
    pub phone_number: Option<String>,
    pub network: Option<NetworkProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub reference: String,
    pub provider_reference: Option<String>,
    /// Link collections are polled on a network-specific endpoint.
    pub network: Option<NetworkProfile>,
}

impl StatusRequest {
    /// Provider-side id if known, else the internal reference.
    pub fn lookup_id(&self) -> &str {
        self.provider_reference
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.reference)
    }
}

/// Reads an integer amount out of loosely typed provider JSON (`2000`, `-2000.0`, `"2000"`).
pub fn json_amount(value: Option<&JsonValue>) -> Option<i64> {
    match value? {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Reads a string id out of provider JSON, accepting numeric ids.
pub fn json_id(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Interprets `Success` flags that arrive as bools or strings.
pub fn json_truthy(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
