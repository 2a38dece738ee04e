use crate::payments::error::PaymentResult;
use crate::payments::types::{
    AccountQuery, DepositRequest, ProviderName, ProviderOutcome, StatusRequest, WithdrawalRequest,
};
use async_trait::async_trait;

/// One interface over every gateway variant.
///
/// On the mobile-money gateways `initiate_deposit` collects from the payer's
/// phone and `initiate_withdrawal` pays out to it. On the platform cashier
/// gateways `initiate_deposit` is the downstream "credit player account"
/// operation and `initiate_withdrawal` debits the player with their
/// withdrawal code.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn initiate_deposit(&self, request: DepositRequest) -> PaymentResult<ProviderOutcome>;

    async fn initiate_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> PaymentResult<ProviderOutcome>;

    async fn verify_account(&self, query: AccountQuery) -> PaymentResult<ProviderOutcome>;

    async fn query_status(&self, request: StatusRequest) -> PaymentResult<ProviderOutcome>;

    /// Authoritative float balance, for gateways that expose one.
    async fn fetch_balance(&self) -> PaymentResult<Option<i64>> {
        Ok(None)
    }
}
