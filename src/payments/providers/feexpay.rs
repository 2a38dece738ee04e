use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    json_amount, json_id, AccountQuery, DepositRequest, NetworkProfile, PaymentState,
    ProviderName, ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_FEEXPAY_BASE_URL: &str = "https://api.feexpay.me";
const DEFAULT_CUSTOMER_EMAIL: &str = "client@mobcash.com";

#[derive(Debug, Clone)]
pub struct FeexpayProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub shop_id: String,
    pub deposit_timeout: Duration,
    pub payout_timeout: Duration,
}

pub struct FeexpayProvider {
    http: PaymentHttpClient,
    config: FeexpayProviderConfig,
}

impl FeexpayProvider {
    pub fn new(http: PaymentHttpClient, mut config: FeexpayProviderConfig) -> PaymentResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(PaymentError::missing_config("FEEXPAY_API_KEY"));
        }
        if config.shop_id.trim().is_empty() {
            return Err(PaymentError::missing_config("FEEXPAY_CUSTOMER_ID"));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { http, config })
    }

    fn auth_header(&self) -> [(&'static str, String); 1] {
        [("Authorization", format!("Bearer {}", self.config.api_key))]
    }

    fn request_to_pay_path(network: &NetworkProfile) -> &'static str {
        if network.is("moov") {
            "/api/transactions/public/requesttopay/moov"
        } else if network.is("mtn") {
            "/api/transactions/public/requesttopay/mtn"
        } else {
            "/api/transactions/public/requesttopay/celtiis_bj"
        }
    }

    /// Payout endpoint and the network label Feexpay expects for it.
    fn payout_target(network: &NetworkProfile) -> (&'static str, String) {
        if network.is("sbin") || network.is("celtiis") {
            ("/api/payouts/public/celtiis_bj", "CELTIIS BJ".to_string())
        } else {
            (
                "/api/payouts/public/transfer/global",
                network.name.to_uppercase(),
            )
        }
    }

    fn split_name(full_name: &str) -> (String, String) {
        let mut parts = full_name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }

    /// Feexpay answers with `reference` either at the top level or under `data`.
    fn created_outcome(response: JsonValue) -> PaymentResult<ProviderOutcome> {
        let reference = json_id(response.get("reference"))
            .or_else(|| response.get("data").and_then(|d| json_id(d.get("reference"))))
            .or_else(|| json_id(response.get("uid")))
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: format!("Feexpay response without reference: {}", response),
            })?;

        let state = response
            .get("status")
            .and_then(|v| v.as_str())
            .map(PaymentState::from_provider_status)
            .unwrap_or(PaymentState::Pending);

        if matches!(state, PaymentState::Failed | PaymentState::Cancelled) {
            return Err(PaymentError::ProviderRejected {
                provider: ProviderName::Feexpay.to_string(),
                message: response
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("request refused")
                    .to_string(),
                provider_code: Some(reference),
            });
        }

        Ok(ProviderOutcome::accepted(Some(reference), response).with_state(state))
    }
}

#[async_trait]
impl PaymentProvider for FeexpayProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Feexpay
    }

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome> {
        if request.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: format!("invalid amount {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let (first_name, last_name) = Self::split_name(&request.customer_name);
        let body = json!({
            "phoneNumber": request.phone_number,
            "amount": request.amount,
            "shop": self.config.shop_id,
            "description": format!("Demande de paiement - Transaction {}", request.reference),
            "firstName": first_name,
            "lastName": last_name,
            "email": request
                .customer_email
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_CUSTOMER_EMAIL.to_string()),
        });

        let url = format!(
            "{}{}",
            self.config.base_url,
            Self::request_to_pay_path(&request.network)
        );
        info!(reference = %request.reference, network = %request.network.name, amount = request.amount, "Feexpay request to pay");
        let response = self
            .http
            .send(
                Method::POST,
                &url,
                &self.auth_header(),
                &[],
                Some(body.to_string()),
                Some(self.config.deposit_timeout),
            )
            .await?;
        Self::created_outcome(response)
    }

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome> {
        if request.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: format!("invalid amount {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let (path, network_label) = Self::payout_target(&request.network);
        let body = json!({
            "phoneNumber": request.phone_number,
            "amount": request.amount.to_string(),
            "shop": self.config.shop_id,
            "network": network_label,
            "motif": "Retrait de caisse",
        });

        info!(reference = %request.reference, network = %network_label, amount = request.amount, "Feexpay payout");
        let response = self
            .http
            .send(
                Method::POST,
                &format!("{}{}", self.config.base_url, path),
                &self.auth_header(),
                &[],
                Some(body.to_string()),
                Some(self.config.payout_timeout),
            )
            .await?;
        Self::created_outcome(response)
    }

    async fn verify_account(&self, query: AccountQuery) -> PaymentResult<ProviderOutcome> {
        Err(PaymentError::ValidationError {
            message: format!(
                "Feexpay does not expose account verification (player {})",
                query.player_id
            ),
            field: None,
        })
    }

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome> {
        let lookup = request.lookup_id().to_string();
        let url = format!(
            "{}/api/transactions/public/single/status/{}",
            self.config.base_url, lookup
        );
        let response = self.http.get(&url, &self.auth_header(), &[]).await?;

        let status = response
            .get("status")
            .or_else(|| response.get("transactionStatus"))
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();
        let state = PaymentState::from_provider_status(&status);

        Ok(ProviderOutcome {
            success: state == PaymentState::Success,
            state,
            provider_transaction_id: Some(lookup),
            raw_message: Some(status),
            payment_link: None,
            amount: json_amount(response.get("amount")),
            raw: response,
        })
    }
}
