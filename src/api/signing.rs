//! HMAC helpers shared by the gateway integrations.

use hmac::{Hmac, Mac, digest::KeyInit};
use sha2::{Sha256, Sha512};

use crate::app_error::AppError;

pub type HmacSha256 = Hmac<Sha256>;
pub type HmacSha512 = Hmac<Sha512>;

fn keyed<M: Mac + KeyInit>(secret: &str, data: &str) -> Result<M, AppError> {
    let mut mac = <M as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Other(anyhow::anyhow!("HMAC key rejected")))?;
    mac.update(data.as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC of `data`.
pub fn sign<M: Mac + KeyInit>(secret: &str, data: &str) -> Result<String, AppError> {
    let mac = keyed::<M>(secret, data)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison against a hex signature (either case).
pub fn verify<M: Mac + KeyInit>(secret: &str, data: &str, signature: &str) -> Result<bool, AppError> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    Ok(keyed::<M>(secret, data)?.verify_slice(&expected).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231, test case 2.
    const KEY: &str = "Jefe";
    const DATA: &str = "what do ya want for nothing?";

    #[test]
    fn sha256_matches_rfc_vector() {
        assert_eq!(
            sign::<HmacSha256>(KEY, DATA).unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sha512_matches_rfc_vector() {
        assert_eq!(
            sign::<HmacSha512>(KEY, DATA).unwrap(),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn verify_accepts_uppercase_and_rejects_tampering() {
        let signature = sign::<HmacSha512>("secret", "amount=1000").unwrap();
        assert!(verify::<HmacSha512>("secret", "amount=1000", &signature.to_uppercase()).unwrap());
        assert!(!verify::<HmacSha512>("secret", "amount=9000", &signature).unwrap());
        assert!(!verify::<HmacSha512>("secret", "amount=1000", "not-hex").unwrap());
    }
}
