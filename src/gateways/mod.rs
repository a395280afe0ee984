// Third-party services behind traits
//
// Handlers only see `Arc<dyn ...>`; the server wires the HTTP clients and the
// integration tests wire in-memory fakes.

pub mod email;
pub mod identity;
pub mod payments;

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub use email::{EmailGateway, HttpEmailGateway, OutgoingEmail};
pub use identity::{Identity, IdentityProvider, OidcUserInfo};
pub use payments::{
    verify_stripe_signature, CheckoutRequest, CheckoutSession, PaymentGateway, SignatureError,
    StripeClient,
};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over the concatenated parts.
pub(crate) fn hmac_hex(key: &[u8], parts: &[&[u8]]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex HMAC-SHA256.
pub(crate) fn hmac_verify(key: &[u8], parts: &[&[u8]], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&expected).is_ok()
}

/// Shared client with a request timeout.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()?;
    Ok(client)
}
