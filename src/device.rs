//! Device authorization: a one-shot signed MAC-address check performed
//! once at startup.
//!
//! A device is authorized if either no signature is configured (backward
//! compatibility for connectors predating this check), or one of the
//! host's network interfaces has a MAC address matching the signed payload
//! under an RSA-PSS/SHA-256 signature from the embedded public key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs8::DecodePublicKey;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::sha2::Sha256;
use serde::Deserialize;

use crate::error::{StunError, StunResult};

/// Embedded PEM public key used to verify MAC-address signatures. Rotated
/// out-of-band with a new crate release; there is no runtime config key
/// for it.
const MAC_ADDRESS_PUBLIC_KEY_PEM: &str = include_str!("../mac_address_pub_key.pem");

#[derive(Debug, Deserialize)]
struct SignedMacAddress {
    payload: String,
    sig: String,
}

/// Returns `true` if the device this process runs on is authorized.
///
/// `signature` is the base64-encoded `{"payload": "<mac>", "sig": "<base64 sig>"}`
/// blob from the top-level config's `mac_address_signature` key.
pub fn is_device_authorized(signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        // No signature configured: authorize, to not break connectors
        // deployed before this check existed.
        return true;
    };

    match check_signature(signature) {
        Ok(authorized) => authorized,
        Err(_) => false,
    }
}

fn check_signature(signature: &str) -> StunResult<bool> {
    let decoded = BASE64
        .decode(signature.trim())
        .map_err(|e| StunError::Other(format!("invalid device signature encoding: {e}")))?;
    let signed: SignedMacAddress = serde_json::from_slice(&decoded)
        .map_err(|e| StunError::Other(format!("invalid device signature payload: {e}")))?;

    let local_macs = local_mac_addresses();
    if !local_macs.iter().any(|mac| mac == &signed.payload) {
        return Ok(false);
    }

    let sig_bytes = BASE64
        .decode(signed.sig.trim())
        .map_err(|e| StunError::Other(format!("invalid device signature: {e}")))?;

    Ok(verify_mac_signature(&signed.payload, &sig_bytes))
}

fn verify_mac_signature(mac_address: &str, signature_bytes: &[u8]) -> bool {
    let Ok(public_key) = rsa::RsaPublicKey::from_public_key_pem(MAC_ADDRESS_PUBLIC_KEY_PEM) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let Ok(signature) = Signature::try_from(signature_bytes) else {
        return false;
    };
    verifying_key
        .verify(mac_address.as_bytes(), &signature)
        .is_ok()
}

fn local_mac_addresses() -> Vec<String> {
    mac_address::iter_macs()
        .into_iter()
        .flatten()
        .flatten()
        .map(|mac| mac.to_string().to_lowercase())
        .collect()
}

/// The first local MAC address, recorded by the Status Registry at
/// startup for the introspection endpoint's `/status` response.
pub fn primary_mac_address() -> Option<String> {
    local_mac_addresses().into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signature_configured_is_authorized() {
        assert!(is_device_authorized(None));
    }

    #[test]
    fn garbage_signature_is_not_authorized() {
        assert!(!is_device_authorized(Some("not-base64-json!!!")));
    }

    #[test]
    fn wellformed_but_unmatched_mac_is_not_authorized() {
        let payload = serde_json::json!({
            "payload": "00:00:00:00:00:00",
            "sig": BASE64.encode(b"not-a-real-signature"),
        });
        let encoded = BASE64.encode(payload.to_string());
        assert!(!is_device_authorized(Some(&encoded)));
    }
}
