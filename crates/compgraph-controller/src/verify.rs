//! Signature verification gate.
//!
//! The gate runs before anything derived from the root descriptor is written.
//! The cryptography sits behind [`SignatureVerifier`]; [`Ed25519Verifier`] is
//! the bundled implementation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use compgraph_core::descriptor::{HASH_ALGORITHM, NORMALISATION_ALGORITHM};
use compgraph_core::{
    ComponentDescriptor, DescriptorSignature, DigestSpec, Error, Result, Signature,
    SignatureSpec, VerificationOutcome,
};
use ring::signature::{Ed25519KeyPair, UnparsedPublicKey, ED25519};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const ED25519_ALGORITHM: &str = "Ed25519";

/// Checks a descriptor against the trusted signatures of an intent.
///
/// `Ok(false)` is a mismatch. `Err` means the check itself could not run.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        descriptor: &ComponentDescriptor,
        signatures: &[Signature],
    ) -> Result<bool>;
}

/// Run the verifier for a root descriptor.
///
/// No trusted signatures configured means there is nothing to check; the gate
/// passes and still reports the digest.
pub async fn verify_component(
    verifier: &dyn SignatureVerifier,
    descriptor: &ComponentDescriptor,
    signatures: &[Signature],
    cancel: &CancellationToken,
) -> Result<VerificationOutcome> {
    let digest = descriptor.digest()?;
    if signatures.is_empty() {
        debug!(component = descriptor.name(), "no signatures configured, skipping verification");
        return Ok(VerificationOutcome {
            verified: true,
            digest,
        });
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let verified = verifier
        .verify(descriptor, signatures)
        .await
        .map_err(|e| match e {
            Error::Verification(_) | Error::Cancelled => e,
            other => Error::Verification(other.to_string()),
        })?;
    Ok(VerificationOutcome { verified, digest })
}

// ---------------------------------------------------------------------------
// Public keys
// ---------------------------------------------------------------------------

/// Resolves the public key named by a trusted signature.
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    async fn public_key(&self, signature: &Signature) -> Result<Vec<u8>>;
}

/// Keys held in memory, by secret name.
#[derive(Default)]
pub struct StaticKeys {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, secret: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(secret.into(), key.into());
        self
    }
}

#[async_trait]
impl PublicKeySource for StaticKeys {
    async fn public_key(&self, signature: &Signature) -> Result<Vec<u8>> {
        let secret = &signature.public_key.secret_ref.name;
        self.keys
            .get(secret)
            .cloned()
            .ok_or_else(|| Error::Verification(format!("public key {secret} not found")))
    }
}

/// Keys on disk: `<dir>/<secret-name>.pub`, base64 of the raw 32-byte key.
pub struct KeyDirectory {
    dir: PathBuf,
}

impl KeyDirectory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl PublicKeySource for KeyDirectory {
    async fn public_key(&self, signature: &Signature) -> Result<Vec<u8>> {
        let path = self
            .dir
            .join(format!("{}.pub", signature.public_key.secret_ref.name));
        let encoded = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::Verification(format!("failed to read public key {}: {}", path.display(), e))
        })?;
        STANDARD.decode(encoded.trim()).map_err(|e| {
            Error::Verification(format!("invalid public key {}: {}", path.display(), e))
        })
    }
}

// ---------------------------------------------------------------------------
// Ed25519
// ---------------------------------------------------------------------------

/// Every trusted signature must be present on the descriptor, carry the
/// descriptor's current digest, and verify over that digest.
pub struct Ed25519Verifier<K> {
    keys: K,
}

impl<K: PublicKeySource> Ed25519Verifier<K> {
    pub fn new(keys: K) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl<K: PublicKeySource> SignatureVerifier for Ed25519Verifier<K> {
    async fn verify(
        &self,
        descriptor: &ComponentDescriptor,
        signatures: &[Signature],
    ) -> Result<bool> {
        let digest = descriptor.digest()?;
        for trusted in signatures {
            let Some(entry) = descriptor.signature(&trusted.name) else {
                warn!(component = descriptor.name(), signature = %trusted.name, "signature missing from descriptor");
                return Ok(false);
            };
            if entry.signature.algorithm != ED25519_ALGORITHM {
                return Err(Error::Verification(format!(
                    "signature {} uses unsupported algorithm {}",
                    entry.name, entry.signature.algorithm
                )));
            }
            if entry.digest.value != digest {
                warn!(component = descriptor.name(), signature = %trusted.name, "digest mismatch");
                return Ok(false);
            }

            let key = self.keys.public_key(trusted).await?;
            let (Ok(message), Ok(sig)) = (hex::decode(&digest), STANDARD.decode(&entry.signature.value)) else {
                return Ok(false);
            };
            if UnparsedPublicKey::new(&ED25519, &key)
                .verify(&message, &sig)
                .is_err()
            {
                warn!(component = descriptor.name(), signature = %trusted.name, "signature does not match");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Sign the descriptor's digest. Used to produce signed fixtures.
pub fn sign(
    descriptor: &ComponentDescriptor,
    name: &str,
    key_pair: &Ed25519KeyPair,
) -> Result<DescriptorSignature> {
    let digest = descriptor.digest()?;
    let message = hex::decode(&digest).map_err(|e| Error::Verification(e.to_string()))?;
    Ok(DescriptorSignature {
        name: name.to_string(),
        digest: DigestSpec {
            hash_algorithm: HASH_ALGORITHM.to_string(),
            normalisation_algorithm: NORMALISATION_ALGORITHM.to_string(),
            value: digest,
        },
        signature: SignatureSpec {
            algorithm: ED25519_ALGORITHM.to_string(),
            value: STANDARD.encode(key_pair.sign(&message).as_ref()),
            media_type: String::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use compgraph_core::{ComponentSpec, PublicKeyRef, SecretRef};
    use ring::rand::SystemRandom;
    use ring::signature::KeyPair;

    fn key_pair() -> Ed25519KeyPair {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor {
            spec: ComponentSpec {
                name: "acme/root".into(),
                version: "v1".into(),
                ..Default::default()
            },
            signatures: vec![],
        }
    }

    fn trusted(name: &str) -> Signature {
        Signature {
            name: name.into(),
            public_key: PublicKeyRef {
                secret_ref: SecretRef {
                    name: format!("{name}-key"),
                },
            },
        }
    }

    #[tokio::test]
    async fn valid_signature_verifies() {
        let kp = key_pair();
        let mut d = descriptor();
        d.signatures.push(sign(&d, "acme", &kp).unwrap());
        let verifier = Ed25519Verifier::new(
            StaticKeys::new().with_key("acme-key", kp.public_key().as_ref().to_vec()),
        );
        assert!(verifier.verify(&d, &[trusted("acme")]).await.unwrap());
    }

    #[tokio::test]
    async fn tampered_descriptor_fails() {
        let kp = key_pair();
        let mut d = descriptor();
        d.signatures.push(sign(&d, "acme", &kp).unwrap());
        d.spec.version = "v2".into();
        let verifier = Ed25519Verifier::new(
            StaticKeys::new().with_key("acme-key", kp.public_key().as_ref().to_vec()),
        );
        assert!(!verifier.verify(&d, &[trusted("acme")]).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_key_fails() {
        let signer = key_pair();
        let other = key_pair();
        let mut d = descriptor();
        d.signatures.push(sign(&d, "acme", &signer).unwrap());
        let verifier = Ed25519Verifier::new(
            StaticKeys::new().with_key("acme-key", other.public_key().as_ref().to_vec()),
        );
        assert!(!verifier.verify(&d, &[trusted("acme")]).await.unwrap());
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let kp = key_pair();
        let mut d = descriptor();
        d.signatures.push(sign(&d, "acme", &kp).unwrap());
        let verifier = Ed25519Verifier::new(StaticKeys::new());
        let err = verifier.verify(&d, &[trusted("acme")]).await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[tokio::test]
    async fn gate_passes_without_trusted_signatures() {
        let verifier = Ed25519Verifier::new(StaticKeys::new());
        let d = descriptor();
        let outcome = verify_component(&verifier, &d, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.digest, d.digest().unwrap());
    }

    #[tokio::test]
    async fn key_directory_reads_base64() {
        let kp = key_pair();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("acme-key.pub"),
            format!("{}\n", STANDARD.encode(kp.public_key().as_ref())),
        )
        .unwrap();
        let keys = KeyDirectory::new(tmp.path());
        let key = keys.public_key(&trusted("acme")).await.unwrap();
        assert_eq!(key, kp.public_key().as_ref());
        assert!(keys.public_key(&trusted("other")).await.is_err());
    }
}
