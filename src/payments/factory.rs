//! Gateway routing and construction.
//!
//! [`route`] is a pure decision over the transaction type, the network profile
//! and whether the platform has cashdesk credentials. [`PaymentProviderFactory`]
//! builds every configured gateway once and hands out shared handles.

use crate::config::{ProviderConfig, TimeoutConfig};
use crate::database::models::TransactionType;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{
    ConnectMode, ConnectProvider, ConnectProviderConfig, ConnectTokenCache, FeexpayProvider,
    FeexpayProviderConfig, LegacyCashierProvider, PlatformApiProvider, PlatformApiProviderConfig,
};
use crate::payments::types::{NetworkApi, NetworkProfile, ProviderName};
use crate::payments::utils::PaymentHttpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const HTTP_MAX_RETRIES: u32 = 2;

/// Which gateways a transaction goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayRoute {
    /// Collection (deposit) or payout (withdrawal, disbursement) on the phone.
    pub mobile_money: Option<ProviderName>,
    /// Credit (deposit, reward) or debit (withdrawal) of the player account.
    pub platform: Option<ProviderName>,
}

fn mobile_money_gateway(transaction_type: TransactionType, network: &NetworkProfile) -> ProviderName {
    let collecting = transaction_type == TransactionType::Deposit;
    let api = if collecting {
        network.deposit_api
    } else {
        network.withdrawal_api
    };
    match api {
        NetworkApi::Feexpay => ProviderName::Feexpay,
        NetworkApi::Connect if collecting && (network.is("wave") || network.payment_by_link) => {
            ProviderName::ConnectLink
        }
        NetworkApi::Connect => ProviderName::ConnectUssd,
    }
}

fn platform_gateway(platform_has_credentials: bool) -> ProviderName {
    if platform_has_credentials {
        ProviderName::LegacyCashier
    } else {
        ProviderName::ExternalPlatform
    }
}

pub fn route(
    transaction_type: TransactionType,
    network: &NetworkProfile,
    platform_has_credentials: bool,
) -> GatewayRoute {
    match transaction_type {
        TransactionType::Deposit | TransactionType::Withdrawal => GatewayRoute {
            mobile_money: Some(mobile_money_gateway(transaction_type, network)),
            platform: Some(platform_gateway(platform_has_credentials)),
        },
        TransactionType::Reward => GatewayRoute {
            mobile_money: None,
            platform: Some(platform_gateway(platform_has_credentials)),
        },
        TransactionType::Disbursement => GatewayRoute {
            mobile_money: Some(mobile_money_gateway(transaction_type, network)),
            platform: None,
        },
    }
}

/// Seam between the orchestrator and the concrete gateways.
pub trait GatewayResolver: Send + Sync {
    fn platform_has_credentials(&self, platform_id: &str) -> bool;

    fn resolve(
        &self,
        provider: ProviderName,
        platform_id: &str,
    ) -> PaymentResult<Arc<dyn PaymentProvider>>;

    fn route(
        &self,
        transaction_type: TransactionType,
        network: &NetworkProfile,
        platform_id: &str,
    ) -> GatewayRoute {
        route(
            transaction_type,
            network,
            self.platform_has_credentials(platform_id),
        )
    }
}

pub struct PaymentProviderFactory {
    connect_link: Option<Arc<dyn PaymentProvider>>,
    connect_ussd: Option<Arc<dyn PaymentProvider>>,
    feexpay: Option<Arc<dyn PaymentProvider>>,
    platform_api: Option<Arc<dyn PaymentProvider>>,
    /// Keyed by lowercase platform id.
    cashiers: HashMap<String, Arc<dyn PaymentProvider>>,
}

impl PaymentProviderFactory {
    /// Builds every gateway whose configuration section is present. A gateway
    /// left unconfigured fails with a configuration error when it is resolved.
    pub fn from_config(
        providers: &ProviderConfig,
        timeouts: &TimeoutConfig,
        connect_callback_url: String,
    ) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(timeouts.default, HTTP_MAX_RETRIES)?;

        let (connect_link, connect_ussd) = match &providers.connect {
            Some(connect) => {
                let tokens = Arc::new(ConnectTokenCache::new(chrono::Duration::hours(
                    connect.token_lifetime_hours,
                )));
                let config = ConnectProviderConfig {
                    base_url: connect.base_url.clone(),
                    identifier: connect.identifier.clone(),
                    password: connect.password.clone(),
                    callback_url: connect_callback_url,
                    wave_link: connect.wave_default_link.clone(),
                    orange_link: connect.orange_default_link.clone(),
                    mtn_link: connect.mtn_default_link.clone(),
                    recipient_label: connect.recipient_label.clone(),
                };
                let link: Arc<dyn PaymentProvider> = Arc::new(ConnectProvider::new(
                    http.clone(),
                    config.clone(),
                    ConnectMode::Link,
                    tokens.clone(),
                )?);
                let ussd: Arc<dyn PaymentProvider> = Arc::new(ConnectProvider::new(
                    http.clone(),
                    config,
                    ConnectMode::Ussd,
                    tokens,
                )?);
                (Some(link), Some(ussd))
            }
            None => {
                warn!("Connect gateway is not configured");
                (None, None)
            }
        };

        let feexpay = match &providers.feexpay {
            Some(feexpay) => Some(Arc::new(FeexpayProvider::new(
                http.clone(),
                FeexpayProviderConfig {
                    base_url: feexpay.base_url.clone(),
                    api_key: feexpay.api_key.clone(),
                    shop_id: feexpay.shop_id.clone(),
                    deposit_timeout: timeouts.deposit,
                    payout_timeout: timeouts.payout,
                },
            )?) as Arc<dyn PaymentProvider>),
            None => {
                warn!("Feexpay gateway is not configured");
                None
            }
        };

        let platform_api = match &providers.platform_api {
            Some(api) => Some(Arc::new(PlatformApiProvider::new(
                http.clone(),
                PlatformApiProviderConfig {
                    base_url: api.base_url.clone(),
                    api_key: api.api_key.clone(),
                    api_secret: api.api_secret.clone(),
                    platform_uids: api.platform_uids.clone(),
                },
            )?) as Arc<dyn PaymentProvider>),
            None => None,
        };

        let mut cashiers = HashMap::new();
        for (platform_id, credentials) in &providers.legacy_cashier.platforms {
            let cashier: Arc<dyn PaymentProvider> = Arc::new(LegacyCashierProvider::new(
                http.clone(),
                providers.legacy_cashier.base_url.clone(),
                credentials.clone(),
            )?);
            cashiers.insert(platform_id.trim().to_lowercase(), cashier);
        }

        info!(
            connect = connect_link.is_some(),
            feexpay = feexpay.is_some(),
            platform_api = platform_api.is_some(),
            cashdesk_platforms = cashiers.len(),
            "Payment gateways initialized"
        );

        Ok(Self {
            connect_link,
            connect_ussd,
            feexpay,
            platform_api,
            cashiers,
        })
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut available = Vec::new();
        if self.connect_link.is_some() {
            available.push(ProviderName::ConnectLink);
        }
        if self.connect_ussd.is_some() {
            available.push(ProviderName::ConnectUssd);
        }
        if self.feexpay.is_some() {
            available.push(ProviderName::Feexpay);
        }
        if self.platform_api.is_some() {
            available.push(ProviderName::ExternalPlatform);
        }
        if !self.cashiers.is_empty() {
            available.push(ProviderName::LegacyCashier);
        }
        available
    }
}

fn configured(
    gateway: &Option<Arc<dyn PaymentProvider>>,
    provider: ProviderName,
) -> PaymentResult<Arc<dyn PaymentProvider>> {
    gateway
        .clone()
        .ok_or_else(|| PaymentError::missing_config(&format!("{} gateway", provider)))
}

impl GatewayResolver for PaymentProviderFactory {
    fn platform_has_credentials(&self, platform_id: &str) -> bool {
        self.cashiers
            .contains_key(&platform_id.trim().to_lowercase())
    }

    fn resolve(
        &self,
        provider: ProviderName,
        platform_id: &str,
    ) -> PaymentResult<Arc<dyn PaymentProvider>> {
        match provider {
            ProviderName::ConnectLink => configured(&self.connect_link, provider),
            ProviderName::ConnectUssd => configured(&self.connect_ussd, provider),
            ProviderName::Feexpay => configured(&self.feexpay, provider),
            ProviderName::ExternalPlatform => configured(&self.platform_api, provider),
            ProviderName::LegacyCashier => self
                .cashiers
                .get(&platform_id.trim().to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    PaymentError::missing_config(&format!(
                        "cashdesk credentials for platform {}",
                        platform_id
                    ))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LegacyCashierConfig, PlatformApiConfig};
    use crate::payments::signature::CashierCredentials;

    fn network(name: &str, api: NetworkApi, by_link: bool) -> NetworkProfile {
        NetworkProfile {
            name: name.to_string(),
            country_code: "ci".to_string(),
            deposit_api: api,
            withdrawal_api: api,
            payment_by_link: by_link,
            customer_pays_fee: true,
            manual_processing: false,
        }
    }

    #[test]
    fn deposits_on_link_networks_use_connect_link() {
        let wave = network("wave", NetworkApi::Connect, false);
        let r = route(TransactionType::Deposit, &wave, true);
        assert_eq!(r.mobile_money, Some(ProviderName::ConnectLink));
        assert_eq!(r.platform, Some(ProviderName::LegacyCashier));

        let orange = network("orange", NetworkApi::Connect, true);
        assert_eq!(
            route(TransactionType::Deposit, &orange, false).mobile_money,
            Some(ProviderName::ConnectLink)
        );
    }

    #[test]
    fn connect_withdrawals_always_use_ussd() {
        let wave = network("wave", NetworkApi::Connect, true);
        let r = route(TransactionType::Withdrawal, &wave, false);
        assert_eq!(r.mobile_money, Some(ProviderName::ConnectUssd));
        assert_eq!(r.platform, Some(ProviderName::ExternalPlatform));
    }

    #[test]
    fn feexpay_networks_route_to_feexpay() {
        let mtn = network("mtn", NetworkApi::Feexpay, false);
        assert_eq!(
            route(TransactionType::Deposit, &mtn, false).mobile_money,
            Some(ProviderName::Feexpay)
        );
        assert_eq!(
            route(TransactionType::Disbursement, &mtn, false),
            GatewayRoute {
                mobile_money: Some(ProviderName::Feexpay),
                platform: None,
            }
        );
    }

    #[test]
    fn rewards_only_credit_the_platform() {
        let mtn = network("mtn", NetworkApi::Connect, false);
        assert_eq!(
            route(TransactionType::Reward, &mtn, true),
            GatewayRoute {
                mobile_money: None,
                platform: Some(ProviderName::LegacyCashier),
            }
        );
    }

    #[test]
    fn unconfigured_gateways_fail_on_resolve() {
        let mut platforms = HashMap::new();
        platforms.insert(
            "1xbet".to_string(),
            CashierCredentials {
                hash: "h".to_string(),
                cashier_pass: "p".to_string(),
                cashdesk_id: "42".to_string(),
            },
        );
        let providers = ProviderConfig {
            connect: None,
            feexpay: None,
            platform_api: Some(PlatformApiConfig {
                base_url: "https://mobcash.example.test".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                platform_uids: HashMap::new(),
            }),
            legacy_cashier: LegacyCashierConfig {
                base_url: "https://cashdesk.example.test".to_string(),
                platforms,
            },
        };
        let factory = PaymentProviderFactory::from_config(
            &providers,
            &TimeoutConfig::default(),
            "https://api.example.test/webhooks/connect".to_string(),
        )
        .unwrap();

        assert!(factory.platform_has_credentials("1XBET"));
        assert!(!factory.platform_has_credentials("melbet"));
        assert_eq!(
            factory.resolve(ProviderName::LegacyCashier, "1xbet").unwrap().name(),
            ProviderName::LegacyCashier
        );
        assert!(matches!(
            factory.resolve(ProviderName::LegacyCashier, "melbet"),
            Err(PaymentError::ConfigurationError { .. })
        ));
        assert!(matches!(
            factory.resolve(ProviderName::Feexpay, "1xbet"),
            Err(PaymentError::ConfigurationError { .. })
        ));
        assert_eq!(
            factory.list_available_providers(),
            vec![ProviderName::ExternalPlatform, ProviderName::LegacyCashier]
        );
    }
}
