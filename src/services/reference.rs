use crate::database::models::TransactionType;
use chrono::Utc;
use rand::Rng;

pub const DEPOSIT_PREFIX: &str = "depot-";
pub const WITHDRAWAL_PREFIX: &str = "retrait-";

pub fn prefix_for(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::Deposit | TransactionType::Reward => DEPOSIT_PREFIX,
        TransactionType::Withdrawal | TransactionType::Disbursement => WITHDRAWAL_PREFIX,
    }
}

/// `{prefix}{epoch millis, 13 digits}{random, 3 digits}`.
pub fn generate_reference(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{}{:013}{:03}", prefix, millis, suffix)
}
