//! Request signing primitives shared by the authenticated adapters.

use super::error::ExchangeError;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing nonce source.
///
/// Seeded from the wall clock in microseconds; concurrent callers within the
/// same microsecond still get distinct, increasing values.
#[derive(Debug, Default)]
pub struct Nonce {
    last: AtomicU64,
}

impl Nonce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

/// HMAC-SHA512 of `message` under `key`.
pub fn hmac_sha512(exchange: &str, key: &[u8], message: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let mut mac = Hmac::<Sha512>::new_from_slice(key)
        .map_err(|_| ExchangeError::api(exchange, "invalid API secret"))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `application/x-www-form-urlencoded` body, keeping parameter order.
pub fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
