use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::{canonical_json, platform_api_signature};
use crate::payments::types::{
    json_amount, json_id, json_truthy, AccountQuery, DepositRequest, PaymentState, ProviderName,
    ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

const DEPOSIT_PATH: &str = "/api/v1/transactions/deposit/";
const WITHDRAW_PATH: &str = "/api/v1/transactions/withdraw/";
const VERIFY_PLAYER_PATH: &str = "/api/v1/transactions/verify-player/";
const PLATFORMS_PATH: &str = "/api/v1/platforms/";
const BALANCE_PATH: &str = "/api/v1/wallets/balance/";

#[derive(Debug, Clone)]
pub struct PlatformApiProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Platform code (lowercase) -> platform uid. Codes missing here are
    /// resolved through the platforms listing and cached.
    pub platform_uids: HashMap<String, String>,
}

/// External cashier API (API key + HMAC-SHA256 request signature).
pub struct PlatformApiProvider {
    http: PaymentHttpClient,
    config: PlatformApiProviderConfig,
    resolved_uids: RwLock<HashMap<String, String>>,
}

impl PlatformApiProvider {
    pub fn new(http: PaymentHttpClient, mut config: PlatformApiProviderConfig) -> PaymentResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(PaymentError::missing_config("platform API base URL"));
        }
        if config.api_key.trim().is_empty() || config.api_secret.trim().is_empty() {
            return Err(PaymentError::missing_config("platform API key/secret"));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let seeded = config
            .platform_uids
            .iter()
            .map(|(code, uid)| (code.trim().to_lowercase(), uid.clone()))
            .collect();

        Ok(Self {
            http,
            config,
            resolved_uids: RwLock::new(seeded),
        })
    }

    fn signed_headers(
        &self,
        method: &Method,
        path: &str,
        body: &str,
    ) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().timestamp();
        let signature = platform_api_signature(
            &self.config.api_secret,
            timestamp,
            method.as_str(),
            path,
            body,
        );
        vec![
            ("X-API-Key", self.config.api_key.clone()),
            ("X-Timestamp", timestamp.to_string()),
            ("X-Signature", signature),
        ]
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        payload: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        // The signed string must be byte-identical to the body on the wire.
        let body = payload.map(canonical_json);
        let headers = self.signed_headers(&method, path, body.as_deref().unwrap_or(""));
        let url = format!("{}{}", self.config.base_url, path);

        debug!(method = %method, path = path, "platform API request");
        if method == Method::GET {
            self.http.get(&url, &headers, &[]).await
        } else {
            self.http.send(method, &url, &headers, &[], body, None).await
        }
    }

    async fn platform_uid(&self, platform_code: &str) -> PaymentResult<String> {
        let key = platform_code.trim().to_lowercase();
        if let Some(uid) = self.resolved_uids.read().await.get(&key) {
            return Ok(uid.clone());
        }

        let listing = self.call(Method::GET, PLATFORMS_PATH, None).await?;
        let uid = listing
            .get("results")
            .and_then(|v| v.as_array())
            .and_then(|platforms| {
                platforms.iter().find(|p| {
                    p.get("code")
                        .and_then(|c| c.as_str())
                        .map(|c| c.trim().eq_ignore_ascii_case(&key))
                        .unwrap_or(false)
                })
            })
            .and_then(|p| json_id(p.get("id")))
            .ok_or_else(|| {
                PaymentError::missing_config(&format!("platform uid for {}", platform_code))
            })?;

        self.resolved_uids.write().await.insert(key, uid.clone());
        Ok(uid)
    }

    /// Success responses nest the cashdesk answer under
    /// `data.mobcash_response.raw_response`.
    fn interpret_cashier_response(&self, response: JsonValue) -> PaymentResult<ProviderOutcome> {
        let raw = response
            .get("mobcash_response")
            .and_then(|m| m.get("raw_response"))
            .or_else(|| {
                response
                    .get("data")
                    .and_then(|d| d.get("mobcash_response"))
                    .and_then(|m| m.get("raw_response"))
            })
            .cloned()
            .unwrap_or(JsonValue::Null);

        let message = raw
            .get("Message")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if !json_truthy(raw.get("Success")) {
            error!(response = %response, "platform cashier operation refused");
            return Err(PaymentError::ProviderRejected {
                provider: ProviderName::ExternalPlatform.to_string(),
                message: message.unwrap_or_else(|| "platform operation refused".to_string()),
                provider_code: json_id(response.get("error_code")),
            });
        }

        let operation_id = json_id(raw.get("OperationId"));
        let summa = json_amount(raw.get("Summa"));
        Ok(ProviderOutcome::accepted(operation_id, response)
            .with_state(PaymentState::Success)
            .with_message(message)
            .with_amount(summa))
    }
}

#[async_trait]
impl PaymentProvider for PlatformApiProvider {
    fn name(&self) -> ProviderName {
        ProviderName::ExternalPlatform
    }

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome> {
        let payload = json!({
            "platform_uid": self.platform_uid(&request.platform_id).await?,
            "player_user_id": request.player_id,
            "amount": request.amount.to_string(),
            "external_transaction_id": request.reference,
            "external_id": request.reference,
            "payment_method": request.network.name.to_uppercase(),
        });

        info!(reference = %request.reference, platform = %request.platform_id, amount = request.amount, "platform API deposit");
        let response = self.call(Method::POST, DEPOSIT_PATH, Some(&payload)).await?;
        self.interpret_cashier_response(response)
    }

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome> {
        let code = request
            .withdrawal_code
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PaymentError::ValidationError {
                message: "withdrawal code is required".to_string(),
                field: Some("withdrawal_code".to_string()),
            })?;

        let payload = json!({
            "platform_uid": self.platform_uid(&request.platform_id).await?,
            "player_user_id": request.player_id,
            "external_transaction_id": request.reference,
            "external_id": request.reference,
            "mobcash_code": code,
        });

        info!(reference = %request.reference, platform = %request.platform_id, "platform API withdrawal");
        let response = self.call(Method::POST, WITHDRAW_PATH, Some(&payload)).await?;
        self.interpret_cashier_response(response)
    }

    async fn verify_account(&self, query: AccountQuery) -> PaymentResult<ProviderOutcome> {
        let payload = json!({
            "platform_uid": self.platform_uid(&query.platform_id).await?,
            "player_user_id": query.player_id,
        });
        let response = self
            .call(Method::POST, VERIFY_PLAYER_PATH, Some(&payload))
            .await?;

        let player = response.get("player").cloned().unwrap_or(JsonValue::Null);
        match json_id(player.get("user_id")) {
            Some(user_id) => {
                let name = player
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Ok(ProviderOutcome::accepted(Some(user_id), response)
                    .with_state(PaymentState::Success)
                    .with_message(name))
            }
            None => Err(PaymentError::rejected(
                ProviderName::ExternalPlatform.as_str(),
                format!("player {} not found", query.player_id),
            )),
        }
    }

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome> {
        let path = format!("/api/v1/transactions/list/{}/", request.lookup_id());
        let response = self.call(Method::GET, &path, None).await?;

        let status = response
            .get("status")
            .or_else(|| response.get("data").and_then(|d| d.get("status")))
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();
        let state = PaymentState::from_provider_status(&status);

        Ok(ProviderOutcome {
            success: state == PaymentState::Success,
            state,
            provider_transaction_id: Some(request.lookup_id().to_string()),
            raw_message: Some(status),
            payment_link: None,
            amount: json_amount(response.get("amount")),
            raw: response,
        })
    }

    async fn fetch_balance(&self) -> PaymentResult<Option<i64>> {
        let response = self.call(Method::GET, BALANCE_PATH, None).await?;
        let balance = response
            .get("data")
            .and_then(|d| d.get("balance"))
            .or_else(|| response.get("balance"));
        match json_amount(balance) {
            Some(value) => Ok(Some(value)),
            None => Err(PaymentError::InvalidResponse {
                message: "wallet balance missing from platform API response".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider() -> PlatformApiProvider {
        let mut uids = HashMap::new();
        uids.insert("1XBET".to_string(), "plat-uid-1".to_string());
        PlatformApiProvider::new(
            PaymentHttpClient::new(Duration::from_secs(5), 0).unwrap(),
            PlatformApiProviderConfig {
                base_url: "https://cashier.example.test/".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                platform_uids: uids,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn configured_platform_uid_is_resolved_without_network() {
        let provider = provider();
        assert_eq!(provider.platform_uid("1xbet").await.unwrap(), "plat-uid-1");
        assert_eq!(provider.config.base_url, "https://cashier.example.test");
    }

    #[test]
    fn signed_headers_carry_key_timestamp_and_signature() {
        let headers = provider().signed_headers(&Method::POST, DEPOSIT_PATH, "{}");
        let names: Vec<&str> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["X-API-Key", "X-Timestamp", "X-Signature"]);
        assert_eq!(headers[2].1.len(), 64);
    }

    #[test]
    fn nested_cashier_answer_is_extracted() {
        let outcome = provider()
            .interpret_cashier_response(json!({
                "mobcash_response": {
                    "raw_response": {"Success": true, "Summa": -5000, "OperationId": 42, "Message": null}
                }
            }))
            .unwrap();
        assert_eq!(outcome.amount, Some(-5000));
        assert_eq!(outcome.provider_transaction_id.as_deref(), Some("42"));
    }

    #[test]
    fn refused_cashier_answer_is_rejection() {
        let err = provider()
            .interpret_cashier_response(json!({
                "mobcash_response": {"raw_response": {"Success": false, "Message": "Limit exceeded"}}
            }))
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderRejected { .. }));
        assert!(!err.is_outcome_unknown());
    }

    #[test]
    fn missing_secret_is_configuration_error() {
        let result = PlatformApiProvider::new(
            PaymentHttpClient::new(Duration::from_secs(5), 0).unwrap(),
            PlatformApiProviderConfig {
                base_url: "https://x.test".to_string(),
                api_key: "key".to_string(),
                api_secret: String::new(),
                platform_uids: HashMap::new(),
            },
        );
        assert!(matches!(result, Err(PaymentError::ConfigurationError { .. })));
    }
}
