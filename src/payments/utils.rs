use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

/// Thin reqwest wrapper. Every call carries a hard timeout and every failure is
/// mapped onto `PaymentError` before it leaves this type.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::ConfigurationError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `body` verbatim (callers that sign the body must pass the exact
    /// bytes they signed). Never retried: provider POSTs are not idempotent.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        query: &[(&str, String)],
        body: Option<String>,
        timeout: Option<Duration>,
    ) -> PaymentResult<JsonValue> {
        let target = if query.is_empty() {
            reqwest::Url::parse(url)
        } else {
            reqwest::Url::parse_with_params(url, query.iter().map(|(k, v)| (*k, v.as_str())))
        }
        .map_err(|e| PaymentError::ConfigurationError {
            message: format!("invalid provider URL {}: {}", url, e),
        })?;

        let mut request = self
            .client
            .request(method.clone(), target)
            .timeout(timeout.unwrap_or(self.timeout))
            .header("Content-Type", "application/json");

        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(payload) = body {
            request = request.body(payload);
        }

        debug!(method = %method, url = %url, "provider request");

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::InvalidResponse {
                message: format!("failed to read provider body: {}", e),
            })?;

        if !status.is_success() {
            return Err(PaymentError::HttpError {
                status: status.as_u16(),
                body: truncate(&text, 500),
            });
        }

        serde_json::from_str::<JsonValue>(&text).map_err(|e| PaymentError::InvalidResponse {
            message: format!("invalid provider JSON response: {} ({})", e, truncate(&text, 200)),
        })
    }

    /// GETs are read-only and safe to retry on transient failures.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, String)],
        query: &[(&str, String)],
    ) -> PaymentResult<JsonValue> {
        let mut attempt = 0;
        loop {
            match self
                .send(Method::GET, url, headers, query, None, None)
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(url = %url, attempt = attempt + 1, error = %e, "provider GET failed, retrying");
                    tokio::time::sleep(Duration::from_millis(250 << attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::TimeoutError {
            message: format!("provider request timed out: {}", e),
        }
    } else {
        PaymentError::NetworkError {
            message: format!("provider request failed: {}", e),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Connect expects local numbers; a leading country prefix is stripped.
pub fn local_phone_number(phone: &str) -> String {
    let phone = phone.trim();
    if phone.len() > 10 {
        phone.chars().skip(3).collect()
    } else {
        phone.to_string()
    }
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::hmac_sha256_hex;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_round_trips_with_signer() {
        let payload = br#"{"uid":"abc","status":"success"}"#;
        let sig = hmac_sha256_hex("secret", std::str::from_utf8(payload).unwrap());
        assert!(verify_hmac_sha256_hex(payload, "secret", &sig));
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
    }

    #[test]
    fn international_prefix_is_stripped() {
        assert_eq!(local_phone_number("2250707070707"), "0707070707");
        assert_eq!(local_phone_number("0707070707"), "0707070707");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
