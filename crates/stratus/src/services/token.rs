//! Join Tokens - signed cluster admission
//!
//! A token admits exactly one named node into one service's cluster.
//! It is minted by a bootstrapped member with that cluster's ed25519 key.
//!
//! Token format: base64url(JSON { claims, signature })
//!
//! Security properties:
//! - Tokens are bound to a single node name and service
//! - Tokens carry the issuer's public key and its SHA-256 fingerprint
//! - Tokens expire (1 hour default)
//! - Each token carries a random one-time secret recorded by the issuer

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use stratus_common::{Peer, ServiceType};

/// What a join token grants
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClaims {
    /// Service the token is valid for
    pub service: ServiceType,
    /// Node allowed to join
    pub name: String,
    /// One-time secret
    pub secret: String,
    /// Issuing node
    pub issuer: String,
    /// Members at issue time (join addresses)
    pub members: Vec<Peer>,
    /// Issuer's cluster public key (base64)
    pub public_key: String,
    /// SHA-256 fingerprint of the public key (hex)
    pub fingerprint: String,
    /// Expiry timestamp (unix seconds)
    pub expires_at: i64,
}

impl JoinClaims {
    pub fn is_expired(&self) -> bool {
        self.expires_at < chrono::Utc::now().timestamp()
    }
}

#[derive(Serialize, Deserialize)]
struct SignedToken {
    claims: JoinClaims,
    signature: String,
}

/// Holder of a cluster's signing key
pub struct TokenSigner {
    signing_key: SigningKey,
}

impl TokenSigner {
    /// Create a fresh cluster key
    pub fn generate() -> Self {
        use rand_core::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load a key written by `save`
    pub async fn load(path: &Path) -> Result<Self> {
        let key_bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read cluster key {}", path.display()))?;

        if key_bytes.len() != 32 {
            bail!("Invalid cluster key length (expected 32 bytes)");
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key_bytes);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.signing_key.to_bytes())
            .await
            .with_context(|| format!("Failed to write cluster key {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .context("Failed to restrict cluster key permissions")?;
        }

        Ok(())
    }

    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign claims into an opaque token string
    pub fn mint(&self, claims: JoinClaims) -> Result<String> {
        let payload = serde_json::to_vec(&claims).context("Failed to serialize join claims")?;
        let signature = self.signing_key.sign(&payload);

        tracing::debug!(
            service = %claims.service,
            target = %claims.name,
            expires_at = claims.expires_at,
            "Issued join token"
        );

        let token = SignedToken {
            claims,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        };
        let bytes = serde_json::to_vec(&token).context("Failed to serialize join token")?;

        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// SHA-256 of a public key, hex encoded
pub fn fingerprint(key: &[u8]) -> String {
    Sha256::digest(key)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Random one-time secret (base64)
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Validate a token presented to `name` for `service`
pub fn verify_token(token: &str, name: &str, service: ServiceType) -> Result<JoinClaims> {
    // Decode outer base64
    let decoded = URL_SAFE_NO_PAD
        .decode(token)
        .context("Invalid token encoding")?;
    let signed: SignedToken = serde_json::from_slice(&decoded).context("Invalid token format")?;
    let claims = signed.claims;

    // 1. Check the token is for us
    if claims.name != name {
        bail!("Token not for this node (target: {}, we are: {})", claims.name, name);
    }
    if claims.service != service {
        bail!("Token is for {}, not {}", claims.service, service);
    }

    // 2. Check expiry
    if claims.is_expired() {
        bail!("Token expired at {}", claims.expires_at);
    }

    // 3. Check the embedded key matches its fingerprint
    let key_bytes = URL_SAFE_NO_PAD
        .decode(&claims.public_key)
        .context("Invalid public key encoding")?;
    if fingerprint(&key_bytes) != claims.fingerprint {
        bail!("Public key does not match fingerprint");
    }

    let key_array: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .context("Invalid public key length")?;
    let issuer_key = VerifyingKey::from_bytes(&key_array).context("Invalid public key")?;

    // 4. Verify signature
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(&signed.signature)
        .context("Invalid signature encoding")?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .context("Invalid signature length")?;
    let signature = Signature::from_bytes(&sig_array);

    let payload = serde_json::to_vec(&claims).context("Failed to serialize join claims")?;
    issuer_key
        .verify(&payload, &signature)
        .context("Invalid signature")?;

    Ok(claims)
}
