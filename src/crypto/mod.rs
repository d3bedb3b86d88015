//! Crypto facade and audit-key management.
//!
//! SHA-256 and Ed25519 are consumed through the `CryptoBackend` trait so an
//! alternate backend can be substituted without touching the audit layers.
//! The audit signing key derives from a seed string; for persistent sessions
//! the seed lives in a mode-0600 file beside the WAL so `audit_verify` can
//! recover the verifying key without the runtime. Seed buffers are zeroized
//! after use.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

pub mod signatures;

/// Prefix of generated audit seeds. Caller-supplied seeds are free-form.
const GENERATED_SEED_PREFIX: &str = "eakseed:";

/// Hash/sign/verify capability consumed by the audit layers.
pub trait CryptoBackend {
    fn sha256(&self, bytes: &[u8]) -> [u8; 32];
    fn sign(&self, message: &[u8]) -> [u8; 64];
    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()>;
    fn public_key(&self) -> [u8; 32];
}

/// Default backend: sha2 + ed25519-dalek.
pub struct Ed25519Backend {
    signing_key: SigningKey,
}

impl Ed25519Backend {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn from_seed(seed: &str) -> Result<Self> {
        Ok(Self {
            signing_key: signing_key_from_seed(seed)?,
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl CryptoBackend for Ed25519Backend {
    fn sha256(&self, bytes: &[u8]) -> [u8; 32] {
        sha256(bytes)
    }

    fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    fn verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| anyhow!("invalid ed25519 public key: {}", e))?;
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|e| anyhow!("signature verification failed: {}", e))
    }

    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

/// Standalone SHA-256.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Derive a signing key from a non-empty seed string.
pub fn signing_key_from_seed(seed: &str) -> Result<SigningKey> {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("device_key_seed is required"));
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(SigningKey::from_bytes(&digest))
}

/// Seed file location for a WAL-backed session.
pub fn device_key_path_for_wal(wal_path: &str) -> Result<PathBuf> {
    if wal_path.is_empty() {
        return Err(anyhow!("device key file path requires a wal_path"));
    }
    Ok(Path::new(wal_path).with_extension("ed25519.seed"))
}

/// Resolve the audit seed for a persistent session.
///
/// A seed already on disk is authoritative: a conflicting configured seed is
/// an error, never an overwrite, because the existing WAL was signed with
/// the stored key. With nothing on disk, the configured seed (or a fresh
/// random one when the configuration leaves it empty) is persisted first and
/// only then returned, so the kernel never signs with a key the verifier
/// cannot recover.
pub fn resolve_session_seed(path: impl AsRef<Path>, configured: &str) -> Result<String> {
    let path = path.as_ref();
    let configured = configured.trim();

    if let Some(stored) = read_stored_seed(path)? {
        if !configured.is_empty() && configured != stored {
            return Err(anyhow!(
                "audit seed conflict at {}: the stored seed signs the existing wal and cannot be replaced",
                path.display()
            ));
        }
        return Ok(stored);
    }

    let seed = if configured.is_empty() {
        generate_seed()
    } else {
        configured.to_string()
    };
    persist_seed(path, &seed)
}

fn generate_seed() -> String {
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let seed = format!("{}{}", GENERATED_SEED_PREFIX, hex::encode(entropy));
    entropy.zeroize();
    seed
}

fn read_stored_seed(path: &Path) -> Result<Option<String>> {
    let raw = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(anyhow!(
                "audit seed at {} is unreadable: {}",
                path.display(),
                err
            ))
        }
    };
    let text = String::from_utf8(raw)
        .map_err(|_| anyhow!("audit seed at {} is not utf-8", path.display()))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(anyhow!(
            "audit seed at {} exists but is empty; remove it to regenerate",
            path.display()
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// Write the seed with owner-only permissions. Creation is exclusive; losing
/// the race to another opener falls back to whatever that opener stored.
fn persist_seed(path: &Path, seed: &str) -> Result<String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                anyhow!("cannot create seed directory {}: {}", parent.display(), e)
            })?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    match options.open(path) {
        Ok(mut file) => {
            use std::io::Write;
            writeln!(file, "{}", seed)
                .and_then(|_| file.sync_all())
                .map_err(|e| anyhow!("cannot persist audit seed {}: {}", path.display(), e))?;
            Ok(seed.to_string())
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            match read_stored_seed(path)? {
                Some(stored) if stored == seed => Ok(stored),
                Some(_) => Err(anyhow!(
                    "audit seed conflict at {}: another session persisted a different seed",
                    path.display()
                )),
                None => Err(anyhow!(
                    "audit seed at {} vanished during creation",
                    path.display()
                )),
            }
        }
        Err(err) => Err(anyhow!(
            "cannot create audit seed {}: {}",
            path.display(),
            err
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_signs_and_verifies() -> Result<()> {
        let backend = Ed25519Backend::from_seed("devkey:test")?;
        let message = b"evidence kernel";
        let signature = backend.sign(message);
        backend.verify(&backend.public_key(), message, &signature)?;
        Ok(())
    }

    #[test]
    fn tampered_signature_is_rejected() -> Result<()> {
        let backend = Ed25519Backend::from_seed("devkey:test")?;
        let mut signature = backend.sign(b"payload");
        signature[0] ^= 0xff;
        assert!(backend
            .verify(&backend.public_key(), b"payload", &signature)
            .is_err());
        Ok(())
    }

    #[test]
    fn seed_derivation_is_deterministic() -> Result<()> {
        let a = signing_key_from_seed("devkey:alpha")?;
        let b = signing_key_from_seed("devkey:alpha")?;
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert!(signing_key_from_seed("  ").is_err());
        Ok(())
    }

    #[test]
    fn empty_config_generates_and_persists_a_seed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.ed25519.seed");
        let created = resolve_session_seed(&path, "")?;
        assert!(created.starts_with(GENERATED_SEED_PREFIX));
        // A second session resolves to the same stored seed.
        assert_eq!(resolve_session_seed(&path, "")?, created);
        Ok(())
    }

    #[test]
    fn configured_seed_is_persisted_then_enforced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.ed25519.seed");
        let stored = resolve_session_seed(&path, "devkey:session_a")?;
        assert_eq!(stored, "devkey:session_a");
        // Same seed re-resolves; a different one is refused.
        assert_eq!(resolve_session_seed(&path, "devkey:session_a")?, stored);
        assert!(resolve_session_seed(&path, "devkey:session_b").is_err());
        // An empty configuration defers to whatever is stored.
        assert_eq!(resolve_session_seed(&path, "")?, stored);
        Ok(())
    }

    #[test]
    fn empty_seed_file_is_an_error_not_a_regenerate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.ed25519.seed");
        std::fs::write(&path, "\n")?;
        assert!(resolve_session_seed(&path, "devkey:x").is_err());
        Ok(())
    }

    #[test]
    fn device_key_path_follows_wal() -> Result<()> {
        let path = device_key_path_for_wal("/data/session.wal")?;
        assert_eq!(path, PathBuf::from("/data/session.ed25519.seed"));
        assert!(device_key_path_for_wal("").is_err());
        Ok(())
    }
}
