use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    json_amount, json_id, AccountQuery, DepositRequest, NetworkProfile, PaymentState,
    ProviderName, ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use crate::payments::utils::{local_phone_number, PaymentHttpClient};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const LOGIN_PATH: &str = "/api/auth/login/";
const NETWORKS_PATH: &str = "/api/payments/networks/";
const WAVE_PATH: &str = "/api/payments/wave-business-transactions/";
const MOMO_PAY_PATH: &str = "/api/payments/momo-pay-transactions/";
const USSD_PATH: &str = "/api/payments/user/transactions/";

/// Which Connect product an instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Wave business transfers and momo-pay links; the user completes payment on a link.
    Link,
    /// USSD push collections and payouts.
    Ussd,
}

#[derive(Debug, Clone)]
pub struct ConnectProviderConfig {
    pub base_url: String,
    pub identifier: String,
    pub password: String,
    pub callback_url: String,
    pub wave_link: Option<String>,
    pub orange_link: Option<String>,
    pub mtn_link: Option<String>,
    pub recipient_label: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access: String,
    refresh: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Bearer token shared by the link and USSD instances. Refreshed only once it
/// has expired or been invalidated after a 401.
#[derive(Debug)]
pub struct ConnectTokenCache {
    lifetime: ChronoDuration,
    state: RwLock<Option<CachedToken>>,
}

impl ConnectTokenCache {
    pub fn new(lifetime: ChronoDuration) -> Self {
        Self {
            lifetime,
            state: RwLock::new(None),
        }
    }

    pub async fn cached(&self, now: DateTime<Utc>) -> Option<String> {
        self.state
            .read()
            .await
            .as_ref()
            .filter(|t| t.expires_at > now)
            .map(|t| t.access.clone())
    }

    pub async fn store(&self, access: String, refresh: Option<String>, now: DateTime<Utc>) {
        *self.state.write().await = Some(CachedToken {
            access,
            refresh,
            expires_at: now + self.lifetime,
        });
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh.clone())
    }

    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }
}

pub struct ConnectProvider {
    http: PaymentHttpClient,
    config: ConnectProviderConfig,
    mode: ConnectMode,
    tokens: Arc<ConnectTokenCache>,
    network_uids: RwLock<HashMap<String, String>>,
}

impl ConnectProvider {
    pub fn new(
        http: PaymentHttpClient,
        mut config: ConnectProviderConfig,
        mode: ConnectMode,
        tokens: Arc<ConnectTokenCache>,
    ) -> PaymentResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(PaymentError::missing_config("Connect base URL"));
        }
        if config.identifier.trim().is_empty() || config.password.is_empty() {
            return Err(PaymentError::missing_config("Connect login credentials"));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            config,
            mode,
            tokens,
            network_uids: RwLock::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(token) = self.tokens.cached(Utc::now()).await {
            return Ok(token);
        }

        // Hold the write lock across the login so concurrent callers wait for
        // one refresh instead of each logging in.
        let mut guard = self.tokens.state.write().await;
        let now = Utc::now();
        if let Some(token) = guard.as_ref().filter(|t| t.expires_at > now) {
            return Ok(token.access.clone());
        }

        let body = json!({
            "identifier": self.config.identifier,
            "password": self.config.password,
        });
        let response = self
            .http
            .send(
                Method::POST,
                &format!("{}{}", self.config.base_url, LOGIN_PATH),
                &[],
                &[],
                Some(body.to_string()),
                None,
            )
            .await?;

        let access = response
            .get("access")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: "Connect login returned no access token".to_string(),
            })?
            .to_string();
        let refresh = response
            .get("refresh")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        info!(expires_in_hours = self.tokens.lifetime.num_hours(), "Connect token refreshed");
        *guard = Some(CachedToken {
            access: access.clone(),
            refresh,
            expires_at: now + self.tokens.lifetime,
        });
        Ok(access)
    }

    async fn authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url, path);
        let headers = [("Authorization", format!("Bearer {}", token))];

        let result = if method == Method::GET {
            self.http.get(&url, &headers, &[]).await
        } else {
            self.http
                .send(method, &url, &headers, &[], body.map(|b| b.to_string()), None)
                .await
        };

        if let Err(PaymentError::HttpError { status: 401, .. }) = &result {
            warn!("Connect rejected bearer token, invalidating cache");
            self.tokens.invalidate().await;
        }
        result
    }

    /// Resolves the Connect network uid for codes like `MTN-CI`.
    async fn network_uid(&self, network: &NetworkProfile) -> PaymentResult<String> {
        let code = network.connect_code();
        if let Some(uid) = self.network_uids.read().await.get(&code) {
            return Ok(uid.clone());
        }

        let listing = self.authorized(Method::GET, NETWORKS_PATH, None).await?;
        let uid = listing
            .get("results")
            .and_then(|v| v.as_array())
            .and_then(|networks| {
                networks.iter().find(|n| {
                    n.get("code")
                        .and_then(|c| c.as_str())
                        .map(|c| c.eq_ignore_ascii_case(&code))
                        .unwrap_or(false)
                })
            })
            .and_then(|n| json_id(n.get("uid")))
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("network {} is not available on Connect", code),
                field: Some("network".to_string()),
            })?;

        debug!(code = %code, uid = %uid, "Connect network resolved");
        self.network_uids.write().await.insert(code, uid.clone());
        Ok(uid)
    }

    fn payment_link(&self, network: &NetworkProfile, amount: i64, reference: &str) -> Option<String> {
        if network.is("wave") {
            self.config
                .wave_link
                .as_ref()
                .map(|link| format!("{}?amount={}", link, amount))
        } else if network.is("orange") {
            self.config
                .orange_link
                .as_ref()
                .map(|link| format!("{}&amount={}", link, amount))
        } else {
            self.config
                .mtn_link
                .as_ref()
                .map(|link| format!("{}?amount={}&reference={}", link, amount, reference))
        }
    }

    fn status_path(&self, network: Option<&NetworkProfile>, uid: &str) -> String {
        match (self.mode, network) {
            (ConnectMode::Link, Some(n)) if n.is("wave") => format!("{}{}/", WAVE_PATH, uid),
            (ConnectMode::Link, _) => format!("{}{}/", MOMO_PAY_PATH, uid),
            (ConnectMode::Ussd, _) => format!("{}{}", USSD_PATH, uid),
        }
    }

    fn created_outcome(&self, response: JsonValue) -> PaymentResult<ProviderOutcome> {
        let uid = response
            .get("data")
            .and_then(|d| json_id(d.get("uid")))
            .or_else(|| json_id(response.get("uid")))
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: format!("Connect response without uid: {}", response),
            })?;
        Ok(ProviderOutcome::accepted(Some(uid), response))
    }

    async fn ussd_transaction(
        &self,
        kind: &str,
        amount: JsonValue,
        phone_number: &str,
        customer_name: &str,
        network: &NetworkProfile,
    ) -> PaymentResult<ProviderOutcome> {
        let body = json!({
            "type": kind,
            "amount": amount,
            "recipient_phone": local_phone_number(phone_number),
            "recipient_name": customer_name,
            "objet": format!("{} {}", self.config.recipient_label, kind),
            "network": self.network_uid(network).await?,
            "callback_url": self.config.callback_url,
        });
        let response = self.authorized(Method::POST, USSD_PATH, Some(body)).await?;
        self.created_outcome(response)
    }
}

#[async_trait]
impl PaymentProvider for ConnectProvider {
    fn name(&self) -> ProviderName {
        match self.mode {
            ConnectMode::Link => ProviderName::ConnectLink,
            ConnectMode::Ussd => ProviderName::ConnectUssd,
        }
    }

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome> {
        let network = &request.network;
        info!(reference = %request.reference, network = %network.name, amount = request.amount, mode = ?self.mode, "Connect collection");

        match self.mode {
            ConnectMode::Link => {
                let (path, mut body) = if network.is("wave") {
                    (WAVE_PATH, json!({}))
                } else {
                    (
                        MOMO_PAY_PATH,
                        json!({"payment_type": format!("{}-{}", network.name, network.country_code)}),
                    )
                };
                body["amount"] = json!(request.amount);
                body["recipient_phone"] = json!(local_phone_number(&request.phone_number));
                body["callback_url"] = json!(self.config.callback_url);

                let response = self.authorized(Method::POST, path, Some(body)).await?;
                let link = self.payment_link(network, request.amount, &request.reference);
                Ok(self.created_outcome(response)?.with_link(link))
            }
            ConnectMode::Ussd => {
                // Collections are a "withdrawal" from the customer's wallet.
                self.ussd_transaction(
                    "withdrawal",
                    json!(request.amount),
                    &request.phone_number,
                    &request.customer_name,
                    network,
                )
                .await
            }
        }
    }

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome> {
        if self.mode == ConnectMode::Link {
            return Err(PaymentError::ValidationError {
                message: "payouts are only issued through Connect USSD".to_string(),
                field: None,
            });
        }
        info!(reference = %request.reference, network = %request.network.name, amount = request.amount, "Connect payout");
        self.ussd_transaction(
            "deposit",
            json!(request.amount.to_string()),
            &request.phone_number,
            &request.customer_name,
            &request.network,
        )
        .await
    }

    async fn verify_account(&self, query: AccountQuery) -> PaymentResult<ProviderOutcome> {
        // Connect has no account lookup; a resolvable network is the only check.
        let network = query.network.ok_or_else(|| PaymentError::ValidationError {
            message: "network is required".to_string(),
            field: Some("network".to_string()),
        })?;
        let uid = self.network_uid(&network).await?;
        Ok(ProviderOutcome::accepted(Some(uid), JsonValue::Null).with_state(PaymentState::Success))
    }

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome> {
        let uid = request.lookup_id().to_string();
        let path = self.status_path(request.network.as_ref(), &uid);
        let response = self.authorized(Method::GET, &path, None).await?;

        let status = response
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();
        let state = PaymentState::from_provider_status(&status);

        Ok(ProviderOutcome {
            success: state == PaymentState::Success,
            state,
            provider_transaction_id: Some(uid),
            raw_message: Some(status),
            payment_link: None,
            amount: json_amount(response.get("amount")),
            raw: response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::NetworkApi;
    use std::time::Duration;

    fn config() -> ConnectProviderConfig {
        ConnectProviderConfig {
            base_url: "https://connect.example.test/".to_string(),
            identifier: "ops@example.test".to_string(),
            password: "secret".to_string(),
            callback_url: "https://api.example.test/connect-pro-webhook".to_string(),
            wave_link: Some("https://pay.wave.com/m/shop".to_string()),
            orange_link: Some("https://orange.example.test/pay?merchant=1".to_string()),
            mtn_link: Some("https://mtn.example.test/pay".to_string()),
            recipient_label: "Mobcash".to_string(),
        }
    }

    fn provider(mode: ConnectMode) -> ConnectProvider {
        ConnectProvider::new(
            PaymentHttpClient::new(Duration::from_secs(5), 0).unwrap(),
            config(),
            mode,
            Arc::new(ConnectTokenCache::new(ChronoDuration::hours(23))),
        )
        .unwrap()
    }

    fn network(name: &str) -> NetworkProfile {
        NetworkProfile {
            name: name.to_string(),
            country_code: "ci".to_string(),
            deposit_api: NetworkApi::Connect,
            withdrawal_api: NetworkApi::Connect,
            payment_by_link: true,
            customer_pays_fee: false,
            manual_processing: false,
        }
    }

    #[tokio::test]
    async fn token_is_served_from_cache_until_expiry() {
        let cache = ConnectTokenCache::new(ChronoDuration::hours(23));
        let now = Utc::now();
        cache.store("abc".to_string(), Some("r".to_string()), now).await;

        assert_eq!(cache.cached(now).await.as_deref(), Some("abc"));
        assert_eq!(
            cache.cached(now + ChronoDuration::hours(22)).await.as_deref(),
            Some("abc")
        );
        assert!(cache.cached(now + ChronoDuration::hours(23)).await.is_none());
        assert_eq!(cache.refresh_token().await.as_deref(), Some("r"));

        cache.invalidate().await;
        assert!(cache.cached(now).await.is_none());
    }

    #[tokio::test]
    async fn cached_token_skips_login() {
        let provider = provider(ConnectMode::Ussd);
        provider
            .tokens
            .store("cached-token".to_string(), None, Utc::now())
            .await;
        assert_eq!(provider.access_token().await.unwrap(), "cached-token");
    }

    #[test]
    fn payment_links_follow_network_templates() {
        let provider = provider(ConnectMode::Link);
        assert_eq!(
            provider.payment_link(&network("wave"), 2020, "depot-1").as_deref(),
            Some("https://pay.wave.com/m/shop?amount=2020")
        );
        assert_eq!(
            provider.payment_link(&network("orange"), 500, "depot-1").as_deref(),
            Some("https://orange.example.test/pay?merchant=1&amount=500")
        );
        assert_eq!(
            provider.payment_link(&network("mtn"), 500, "depot-1").as_deref(),
            Some("https://mtn.example.test/pay?amount=500&reference=depot-1")
        );
    }

    #[test]
    fn status_endpoint_depends_on_product() {
        let link = provider(ConnectMode::Link);
        assert_eq!(
            link.status_path(Some(&network("wave")), "u1"),
            "/api/payments/wave-business-transactions/u1/"
        );
        assert_eq!(
            link.status_path(Some(&network("mtn")), "u1"),
            "/api/payments/momo-pay-transactions/u1/"
        );
        let ussd = provider(ConnectMode::Ussd);
        assert_eq!(
            ussd.status_path(Some(&network("wave")), "u1"),
            "/api/payments/user/transactions/u1"
        );
    }

    #[test]
    fn uid_is_read_from_data() {
        let outcome = provider(ConnectMode::Ussd)
            .created_outcome(json!({"data": {"uid": "c0ffee"}}))
            .unwrap();
        assert_eq!(outcome.provider_transaction_id.as_deref(), Some("c0ffee"));
        assert_eq!(outcome.state, PaymentState::Pending);

        let err = provider(ConnectMode::Ussd)
            .created_outcome(json!({"detail": "bad request"}))
            .unwrap_err();
        assert!(err.is_outcome_unknown());
    }

    #[tokio::test]
    async fn link_mode_refuses_payouts() {
        let err = provider(ConnectMode::Link)
            .initiate_withdrawal(WithdrawalRequest {
                reference: "retrait-1".to_string(),
                amount: 1000,
                phone_number: "2250700000000".to_string(),
                customer_name: "A".to_string(),
                network: network("wave"),
                player_id: "1".to_string(),
                platform_id: "p".to_string(),
                withdrawal_code: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }
}
