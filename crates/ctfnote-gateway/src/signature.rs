use anyhow::{anyhow, bail, Context, Result};
use ed25519_dalek::{Signature, VerifyingKey};

/// Interactions signed further than this from the local clock are refused.
pub const MAX_TIMESTAMP_SKEW_SECS: u64 = 300;

/// Checks Discord's `X-Signature-Ed25519` header: an ed25519 signature over
/// the timestamp header followed by the raw body.
#[derive(Debug, Clone)]
pub struct InteractionVerifier {
    key: VerifyingKey,
}

impl InteractionVerifier {
    pub fn from_hex(public_key_hex: &str) -> Result<Self> {
        let bytes: [u8; 32] = decode_hex(public_key_hex)?
            .try_into()
            .map_err(|_| anyhow!("discord public key must be 32 bytes"))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .context("failed to decode discord ed25519 public key")?;
        Ok(Self { key })
    }

    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> Result<()> {
        self.verify_at(timestamp, body, signature_hex, current_unix_timestamp())
    }

    pub fn verify_at(
        &self,
        timestamp: &str,
        body: &[u8],
        signature_hex: &str,
        now_unix: u64,
    ) -> Result<()> {
        let signed_at = timestamp
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid signature timestamp '{timestamp}'"))?;
        if signed_at.abs_diff(now_unix) > MAX_TIMESTAMP_SKEW_SECS {
            bail!("signature timestamp {signed_at} is outside the accepted window");
        }
        let signature_bytes: [u8; 64] = decode_hex(signature_hex)?
            .try_into()
            .map_err(|_| anyhow!("signature must be 64 bytes"))?;
        let signature = Signature::from_bytes(&signature_bytes);
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        self.key
            .verify_strict(&message, &signature)
            .map_err(|error| anyhow!("invalid ed25519 signature: {error}"))
    }
}

fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("hex value cannot be empty");
    }
    if trimmed.len() % 2 != 0 {
        bail!("hex value must have an even number of characters");
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    let mut index = 0usize;
    while index < trimmed.len() {
        let next = index.saturating_add(2);
        let chunk = trimmed
            .get(index..next)
            .ok_or_else(|| anyhow!("hex value must be ascii"))?;
        let byte = u8::from_str_radix(chunk, 16)
            .with_context(|| format!("invalid hex byte '{chunk}'"))?;
        bytes.push(byte);
        index = next;
    }
    Ok(bytes)
}

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn unit_valid_signature_over_timestamp_and_body_verifies() {
        let key = signing_key();
        let verifier = InteractionVerifier::from_hex(&encode_hex(key.verifying_key().as_bytes()))
            .expect("key");
        let body = br#"{"type":1}"#;
        let signature = key.sign(&[b"1700000000".as_slice(), body.as_slice()].concat());

        verifier
            .verify_at("1700000000", body, &encode_hex(&signature.to_bytes()), 1_700_000_010)
            .expect("valid");
    }

    #[test]
    fn regression_tampered_body_or_timestamp_is_rejected() {
        let key = signing_key();
        let verifier = InteractionVerifier::from_hex(&encode_hex(key.verifying_key().as_bytes()))
            .expect("key");
        let signature = encode_hex(&key.sign(b"1700000000{\"type\":1}").to_bytes());

        let now = 1_700_000_000;
        assert!(verifier
            .verify_at("1700000000", br#"{"type":2}"#, &signature, now)
            .is_err());
        assert!(verifier
            .verify_at("1700000001", br#"{"type":1}"#, &signature, now)
            .is_err());
        assert!(verifier
            .verify_at("1700000000", br#"{"type":1}"#, "zz", now)
            .is_err());
    }

    #[test]
    fn regression_replayed_signature_outside_the_window_is_rejected() {
        let key = signing_key();
        let verifier = InteractionVerifier::from_hex(&encode_hex(key.verifying_key().as_bytes()))
            .expect("key");
        let body = br#"{"type":1}"#;
        let signature = encode_hex(&key.sign(b"1700000000{\"type\":1}").to_bytes());

        verifier
            .verify_at("1700000000", body, &signature, 1_700_000_000 + MAX_TIMESTAMP_SKEW_SECS)
            .expect("edge of the window");
        let stale = verifier
            .verify_at("1700000000", body, &signature, 1_700_000_001 + MAX_TIMESTAMP_SKEW_SECS)
            .expect_err("stale");
        assert!(stale.to_string().contains("outside the accepted window"));
        assert!(verifier
            .verify_at("1700000000", body, &signature, 1_699_999_999 - MAX_TIMESTAMP_SKEW_SECS)
            .is_err());
        assert!(verifier.verify_at("soon", body, &signature, 1_700_000_000).is_err());
        assert!(verifier.verify("1700000000", body, &signature).is_err());
    }

    #[test]
    fn unit_public_key_must_be_32_hex_bytes() {
        assert!(InteractionVerifier::from_hex("abcd").is_err());
        assert!(InteractionVerifier::from_hex("").is_err());
    }
}
