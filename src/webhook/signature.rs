use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// Hex-encoded HMAC-SHA256 of the raw request body.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    match mac_for(secret) {
        Some(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        None => String::new(),
    }
}

/// Checks a signature header value against the body in constant time.
/// Accepts bare hex or a `sha256=` prefixed value. An empty secret never
/// verifies.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let provided = provided.trim();
    let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);
    let Ok(expected) = hex::decode(provided) else {
        return false;
    };
    let Some(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";
    const BODY: &[u8] = br#"{"request_id":"req-1","event":"progress","progress":10}"#;

    #[test]
    fn computed_signature_verifies() {
        let signature = compute_signature(SECRET, BODY);
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(SECRET, BODY, &signature));
        assert!(verify_signature(SECRET, BODY, &format!("sha256={signature}")));
        assert!(verify_signature(SECRET, BODY, &signature.to_uppercase()));
    }

    #[test]
    fn known_vector_matches() {
        // RFC 4231 test case 2.
        assert_eq!(
            compute_signature("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let signature = compute_signature(SECRET, BODY);
        assert!(!verify_signature(SECRET, b"{}", &signature));
        assert!(!verify_signature("other-secret", BODY, &signature));
        assert!(!verify_signature(SECRET, BODY, "not-hex"));
        assert!(!verify_signature(SECRET, BODY, ""));
        assert!(!verify_signature("", BODY, &compute_signature("", BODY)));
    }
}
