//! Per-provider request signing. Everything here is a pure function of
//! credentials and payload.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Timestamp layout the legacy cashier expects for balance queries.
pub const CASHIER_TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `SHA256( SHA256(ctx1) + MD5(ctx2) )`, hex encoded.
pub fn layered_signature(ctx1: &str, ctx2: &str) -> String {
    let combined = format!("{}{}", sha256_hex(ctx1), md5_hex(ctx2));
    sha256_hex(&combined)
}

/// `MD5("{id}:{hash}")`.
pub fn confirm_token(id: &str, hash: &str) -> String {
    md5_hex(&format!("{}:{}", id, hash))
}

pub fn format_cashier_timestamp(at: DateTime<Utc>) -> String {
    at.format(CASHIER_TIMESTAMP_FORMAT).to_string()
}

/// Amounts are signed and sent as floats by the cashier (`2000.0`).
pub fn format_summa(amount: i64) -> String {
    format!("{}.0", amount)
}

#[derive(Debug, Clone)]
pub struct CashierCredentials {
    pub hash: String,
    pub cashier_pass: String,
    pub cashdesk_id: String,
}

/// Legacy cashier operations; each has its own ctx1/ctx2 layout.
#[derive(Debug, Clone)]
pub enum CashierOperation<'a> {
    Deposit { user_id: &'a str, amount: i64 },
    Payout { user_id: &'a str, code: &'a str },
    Balance { timestamp: &'a str },
    UserSearch { user_id: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashierSignature {
    /// Goes into the `Sign` header.
    pub sign: String,
    pub confirm: String,
}

pub fn sign_cashier_request(
    creds: &CashierCredentials,
    operation: &CashierOperation<'_>,
) -> CashierSignature {
    let CashierCredentials {
        hash,
        cashier_pass,
        cashdesk_id,
    } = creds;

    let (ctx1, ctx2, confirm) = match operation {
        CashierOperation::Deposit { user_id, amount } => (
            format!("hash={}&lng=fr&userid={}", hash, user_id),
            format!(
                "summa={}&cashierpass={}&cashdeskid={}",
                format_summa(*amount),
                cashier_pass,
                cashdesk_id
            ),
            confirm_token(user_id, hash),
        ),
        CashierOperation::Payout { user_id, code } => (
            format!("hash={}&lng=fr&userid={}", hash, user_id),
            format!(
                "code={}&cashierpass={}&cashdeskid={}",
                code, cashier_pass, cashdesk_id
            ),
            confirm_token(user_id, hash),
        ),
        CashierOperation::Balance { timestamp } => (
            format!("hash={}&cashierpass={}&dt={}", hash, cashier_pass, timestamp),
            format!(
                "dt={}&cashierpass={}&cashdeskid={}",
                timestamp, cashier_pass, cashdesk_id
            ),
            confirm_token(cashdesk_id, hash),
        ),
        CashierOperation::UserSearch { user_id } => (
            format!(
                "hash={}&userid={}&cashdeskid={}",
                hash, user_id, cashdesk_id
            ),
            format!(
                "userid={}&cashierpass={}&hash={}",
                user_id, cashier_pass, hash
            ),
            confirm_token(user_id, hash),
        ),
    };

    CashierSignature {
        sign: layered_signature(&ctx1, &ctx2),
        confirm,
    }
}

/// Compact JSON with object keys sorted at every depth. The HMAC covers these
/// exact bytes, so the same function is used for signing and for the body sent.
/// Sorted because `serde_json` maps are `BTreeMap`s without `preserve_order`.
pub fn canonical_json(value: &JsonValue) -> String {
    value.to_string()
}

/// `HMAC-SHA256(secret, timestamp + METHOD + path + body)`, hex encoded.
pub fn platform_api_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> String {
    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);
    hmac_sha256_hex(secret, &message)
}
