use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE verifier and its S256 challenge, generated for one social sign-in.
///
/// The verifier stays on the client until the authorization code comes back;
/// only the challenge travels in the authorize URL.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Fresh random verifier (64 URL-safe characters, RFC 7636 allows 43-128).
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 48] = rand::rng().random();
        Self::from_verifier(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// `challenge = BASE64URL(SHA256(verifier))`
    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Method name as the identity service spells it. Plain is never offered.
    #[must_use]
    pub fn method(&self) -> &'static str {
        "s256"
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_and_sized() {
        let pair = PkcePair::generate();
        assert_eq!(pair.verifier().len(), 64);
        assert!(
            pair.verifier()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {}",
            pair.verifier()
        );
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(PkcePair::generate().verifier(), PkcePair::generate().verifier());
    }

    #[test]
    fn rfc7636_appendix_b_vector() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mJ0rznD5v0Eu96fBRUKEsHpvM4Nfzc");
        assert_eq!(pair.challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::from_verifier("secret-verifier");
        assert!(!format!("{pair:?}").contains("secret-verifier"));
    }
}
