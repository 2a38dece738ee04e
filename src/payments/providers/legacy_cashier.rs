use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::{
    format_cashier_timestamp, sign_cashier_request, CashierCredentials, CashierOperation,
    CashierSignature,
};
use crate::payments::types::{
    json_amount, json_id, json_truthy, AccountQuery, DepositRequest, PaymentState, ProviderName,
    ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

pub const DEFAULT_CASHDESK_BASE_URL: &str = "https://partners.servcul.com/CashdeskBotAPI";

/// Betting-platform cashdesk API authenticated with the layered SHA256/MD5 scheme.
pub struct LegacyCashierProvider {
    http: PaymentHttpClient,
    base_url: String,
    credentials: CashierCredentials,
}

impl LegacyCashierProvider {
    pub fn new(
        http: PaymentHttpClient,
        base_url: impl Into<String>,
        credentials: CashierCredentials,
    ) -> PaymentResult<Self> {
        if credentials.hash.is_empty()
            || credentials.cashier_pass.is_empty()
            || credentials.cashdesk_id.is_empty()
        {
            return Err(PaymentError::missing_config("cashdesk credentials"));
        }
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn cashdesk_id_value(&self) -> JsonValue {
        match self.credentials.cashdesk_id.parse::<i64>() {
            Ok(id) => json!(id),
            Err(_) => json!(self.credentials.cashdesk_id),
        }
    }

    fn sign(&self, operation: CashierOperation<'_>) -> CashierSignature {
        sign_cashier_request(&self.credentials, &operation)
    }

    /// `{Success, Message, Summa, OperationId}` responses.
    fn interpret_operation(&self, response: JsonValue) -> PaymentResult<ProviderOutcome> {
        let message = response
            .get("Message")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if !json_truthy(response.get("Success")) {
            return Err(PaymentError::ProviderRejected {
                provider: ProviderName::LegacyCashier.to_string(),
                message: message.unwrap_or_else(|| "cashdesk operation refused".to_string()),
                provider_code: json_id(response.get("errorCode")),
            });
        }

        let operation_id = json_id(response.get("OperationId"));
        let summa = json_amount(response.get("Summa"));
        Ok(ProviderOutcome::accepted(operation_id, response)
            .with_state(PaymentState::Success)
            .with_message(message)
            .with_amount(summa))
    }
}

#[async_trait]
impl PaymentProvider for LegacyCashierProvider {
    fn name(&self) -> ProviderName {
        ProviderName::LegacyCashier
    }

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome> {
        let signature = self.sign(CashierOperation::Deposit {
            user_id: &request.player_id,
            amount: request.amount,
        });
        let url = format!("{}/Deposit/{}/Add", self.base_url, request.player_id);
        let body = json!({
            "cashdeskid": self.cashdesk_id_value(),
            "lng": "fr",
            "summa": request.amount as f64,
            "confirm": signature.confirm,
        });

        info!(reference = %request.reference, player_id = %request.player_id, amount = request.amount, "cashdesk credit");
        let response = self
            .http
            .send(
                Method::POST,
                &url,
                &[("Sign", signature.sign)],
                &[],
                Some(body.to_string()),
                None,
            )
            .await?;
        self.interpret_operation(response)
    }

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome> {
        let code = request
            .withdrawal_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PaymentError::ValidationError {
                message: "withdrawal code is required".to_string(),
                field: Some("withdrawal_code".to_string()),
            })?;

        let signature = self.sign(CashierOperation::Payout {
            user_id: &request.player_id,
            code,
        });
        let url = format!("{}/Deposit/{}/Payout", self.base_url, request.player_id);
        let body = json!({
            "cashdeskId": self.cashdesk_id_value(),
            "lng": "fr",
            "code": code,
            "confirm": signature.confirm,
        });

        info!(reference = %request.reference, player_id = %request.player_id, "cashdesk payout");
        let response = self
            .http
            .send(
                Method::POST,
                &url,
                &[("Sign", signature.sign)],
                &[],
                Some(body.to_string()),
                None,
            )
            .await?;
        self.interpret_operation(response)
    }

    async fn verify_account(&self, query: AccountQuery) -> PaymentResult<ProviderOutcome> {
        let signature = self.sign(CashierOperation::UserSearch {
            user_id: &query.player_id,
        });
        let url = format!("{}/Users/{}", self.base_url, query.player_id);
        let response = self
            .http
            .get(
                &url,
                &[("Sign", signature.sign)],
                &[
                    ("confirm", signature.confirm),
                    ("cashdeskid", self.credentials.cashdesk_id.clone()),
                ],
            )
            .await?;

        match json_id(response.get("UserId")) {
            Some(user_id) => {
                let name = response
                    .get("Name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Ok(ProviderOutcome::accepted(Some(user_id), response)
                    .with_state(PaymentState::Success)
                    .with_message(name))
            }
            None => Err(PaymentError::rejected(
                ProviderName::LegacyCashier.as_str(),
                format!("player {} not found", query.player_id),
            )),
        }
    }

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome> {
        // Cashdesk operations settle synchronously; there is nothing to poll.
        warn!(reference = %request.reference, "status query on cashdesk gateway");
        Err(PaymentError::ValidationError {
            message: "cashdesk operations have no status endpoint".to_string(),
            field: None,
        })
    }

    async fn fetch_balance(&self) -> PaymentResult<Option<i64>> {
        let timestamp = format_cashier_timestamp(Utc::now());
        let signature = self.sign(CashierOperation::Balance {
            timestamp: &timestamp,
        });
        let url = format!(
            "{}/Cashdesk/{}/Balance",
            self.base_url, self.credentials.cashdesk_id
        );
        let response = self
            .http
            .get(
                &url,
                &[("Sign", signature.sign)],
                &[("confirm", signature.confirm), ("dt", timestamp.clone())],
            )
            .await?;

        match json_amount(response.get("Limit")) {
            Some(limit) => Ok(Some(limit)),
            None => Err(PaymentError::InvalidResponse {
                message: format!("cashdesk balance without Limit: {}", response),
            }),
        }
    }
}
