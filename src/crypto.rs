//! Diffie-Hellman key material and the primitive the tree is built on

use hkdf::Hkdf;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{TreeError, TreeResult};

/// A 32-byte group secret
pub type Secret = [u8; 32];

/// HKDF label used to turn a node's group key into its private scalar
const NODE_KEY_LABEL: &[u8] = b"tgdh node key";

/// X25519 key pair held by every tree node
///
/// The private key (sk) is automatically zeroized when dropped to prevent
/// it from lingering in memory.
#[derive(Clone, Debug, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub sk: [u8; 32],
    pub pk: [u8; 32],
}

impl KeyPair {
    /// All-zero placeholder for a node whose keys are not derived yet
    pub fn empty() -> Self {
        Self {
            sk: [0u8; 32],
            pk: [0u8; 32],
        }
    }
}

/// The Diffie-Hellman capability the key tree depends on
///
/// Implementations are expected to succeed on well-formed keys; an `Err` is
/// treated as fatal by the tree and never retried.
pub trait KeyPrimitive {
    /// Generate a fresh random key pair
    fn generate_keypair(&mut self) -> TreeResult<KeyPair>;

    /// DH(private_key, peer_public)
    fn compute_shared_secret(
        &self,
        private_key: &[u8; 32],
        peer_public: &[u8; 32],
    ) -> TreeResult<Secret>;

    /// Deterministically derive a node key pair from a group secret
    fn keypair_from_secret(&self, secret: &Secret) -> TreeResult<KeyPair>;
}

/// X25519 primitive backed by a seedable CSPRNG
pub struct X25519 {
    rng: StdRng,
}

impl X25519 {
    /// Primitive seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible primitive for tests and demos
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for X25519 {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPrimitive for X25519 {
    fn generate_keypair(&mut self) -> TreeResult<KeyPair> {
        let sk = StaticSecret::random_from_rng(&mut self.rng);
        let pk = PublicKey::from(&sk);

        Ok(KeyPair {
            sk: sk.to_bytes(),
            pk: pk.to_bytes(),
        })
    }

    fn compute_shared_secret(
        &self,
        private_key: &[u8; 32],
        peer_public: &[u8; 32],
    ) -> TreeResult<Secret> {
        let sk = StaticSecret::from(*private_key);
        let pk = PublicKey::from(*peer_public);
        let shared = sk.diffie_hellman(&pk);

        // A low-order peer point yields an all-zero secret every party can guess
        if !shared.was_contributory() {
            return Err(TreeError::PrimitiveFailure(
                "non-contributory X25519 exchange".to_string(),
            ));
        }

        Ok(shared.to_bytes())
    }

    fn keypair_from_secret(&self, secret: &Secret) -> TreeResult<KeyPair> {
        let node_secret = hkdf_expand(secret, NODE_KEY_LABEL)?;
        let sk = StaticSecret::from(node_secret);
        let pk = PublicKey::from(&sk);

        Ok(KeyPair {
            sk: sk.to_bytes(),
            pk: pk.to_bytes(),
        })
    }
}

/// HKDF-Expand with SHA-256, 32 bytes of output
fn hkdf_expand(prk: &[u8], info: &[u8]) -> TreeResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|_| TreeError::PrimitiveFailure("invalid HKDF PRK length".to_string()))?;

    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| TreeError::PrimitiveFailure("HKDF expand failed".to_string()))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let mut primitive = X25519::new();
        let keypair = primitive.generate_keypair().unwrap();

        // Verify public key can be derived from private key
        let sk = StaticSecret::from(keypair.sk);
        let pk = PublicKey::from(&sk);
        assert_eq!(keypair.pk, pk.to_bytes());
        assert_ne!(keypair.sk, [0u8; 32]);
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let mut primitive = X25519::new();
        let a = primitive.generate_keypair().unwrap();
        let b = primitive.generate_keypair().unwrap();

        let ab = primitive.compute_shared_secret(&a.sk, &b.pk).unwrap();
        let ba = primitive.compute_shared_secret(&b.sk, &a.pk).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_keypair_from_secret_is_deterministic() {
        let primitive = X25519::new();
        let secret = [42u8; 32];

        let first = primitive.keypair_from_secret(&secret).unwrap();
        let second = primitive.keypair_from_secret(&secret).unwrap();
        assert_eq!(first.sk, second.sk);
        assert_eq!(first.pk, second.pk);

        // The derived scalar is not the secret itself
        assert_ne!(first.sk, secret);

        let other = primitive.keypair_from_secret(&[43u8; 32]).unwrap();
        assert_ne!(first.pk, other.pk);
    }

    #[test]
    fn test_seeded_primitive_is_reproducible() {
        let mut p1 = X25519::seeded(7);
        let mut p2 = X25519::seeded(7);
        let mut p3 = X25519::seeded(8);

        let k1 = p1.generate_keypair().unwrap();
        let k2 = p2.generate_keypair().unwrap();
        let k3 = p3.generate_keypair().unwrap();

        assert_eq!(k1.sk, k2.sk);
        assert_ne!(k1.sk, k3.sk);
    }

    #[test]
    fn test_low_order_peer_is_rejected() {
        let mut primitive = X25519::new();
        let a = primitive.generate_keypair().unwrap();

        let result = primitive.compute_shared_secret(&a.sk, &[0u8; 32]);
        assert!(matches!(result, Err(TreeError::PrimitiveFailure(_))));
    }

    #[test]
    fn test_hkdf_expand() {
        let prk = [1u8; 32];

        let result1 = hkdf_expand(&prk, b"test info").unwrap();
        let result2 = hkdf_expand(&prk, b"test info").unwrap();
        assert_eq!(result1, result2);

        let result3 = hkdf_expand(&prk, b"different info").unwrap();
        assert_ne!(result1, result3);

        // PRK shorter than the hash output is rejected
        assert!(hkdf_expand(&[1u8; 8], b"test info").is_err());
    }
}
