mod cert;
mod envelope;
mod validators;
mod votes;

use std::fmt;
use std::hash::Hash;

use alloy_primitives::{B256, U256, keccak256};
use alloy_rlp::{BufMut, Decodable, Encodable};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use data_encoding::HEXLOWER;

pub use alloy_primitives::Address;
pub use cert::{Certificate, QuorumViolation};
pub use envelope::{AuthenticationError, Envelope, Unchecked, Validated};
pub use validators::{ValidatorSet, fault_tolerance, quorum_size};
pub use votes::{AccumulatorError, VoteAccumulator};

/// Length of an encoded signature: `r || s || v` with `v` in `{0, 1}`.
pub const SIGNATURE_LEN: usize = 65;

/// A secp256k1 signing key of a validator.
#[derive(Clone)]
pub struct Keypair {
    signer: PrivateKeySigner,
}

/// A recoverable secp256k1 signature over a 32-byte digest.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, InvalidSecretKey> {
        let signer =
            PrivateKeySigner::from_bytes(&B256::from(*bytes)).map_err(|_| InvalidSecretKey(()))?;
        Ok(Self { signer })
    }

    /// The validator address derived from the public key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign a digest deterministically (RFC 6979).
    pub fn sign(&self, digest: &B256) -> Signature {
        let sig = self
            .signer
            .sign_hash_sync(digest)
            .expect("signing a prehash with a valid key never fails");
        let mut bytes = [0; SIGNATURE_LEN];
        bytes[..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
        bytes[32..64].copy_from_slice(&sig.s().to_be_bytes::<32>());
        bytes[64] = sig.v() as u8;
        Signature(bytes)
    }
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    /// Recover the address of the key that produced this signature over `digest`.
    pub fn recover(&self, digest: &B256) -> Result<Address, InvalidSignature> {
        let parity = match self.0[64] {
            0 => false,
            1 => true,
            _ => return Err(InvalidSignature(())),
        };
        let r = U256::from_be_slice(&self.0[..32]);
        let s = U256::from_be_slice(&self.0[32..64]);
        alloy_primitives::Signature::new(r, s, parity)
            .recover_address_from_prehash(digest)
            .map_err(|_| InvalidSignature(()))
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = InvalidSignature;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_LEN] = value.try_into().map_err(|_| InvalidSignature(()))?;
        if bytes[64] > 1 {
            return Err(InvalidSignature(()));
        }
        Ok(Self(bytes))
    }
}

impl From<Signature> for [u8; SIGNATURE_LEN] {
    fn from(s: Signature) -> Self {
        s.0
    }
}

impl Encodable for Signature {
    fn encode(&self, out: &mut dyn BufMut) {
        self.0.encode(out)
    }

    fn length(&self) -> usize {
        self.0.length()
    }
}

impl Decodable for Signature {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = <[u8; SIGNATURE_LEN]>::decode(buf)?;
        Signature::try_from(&bytes[..])
            .map_err(|_| alloy_rlp::Error::Custom("invalid signature recovery id"))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", HEXLOWER.encode(&self.0))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", HEXLOWER.encode(&self.0[..8]))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .field("secret_key", &"SecretKey")
            .finish()
    }
}

/// Payloads that can be signed by a validator.
///
/// The signing digest is `keccak256(TAG || rlp(payload))`. Distinct tags per
/// payload kind keep a signature for one kind from being valid for another.
pub trait Signable: Encodable {
    const TAG: u8;

    fn signing_digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(1 + self.length());
        buf.push(Self::TAG);
        self.encode(&mut buf);
        keccak256(&buf)
    }
}

/// Votes are grouped by key when counting towards a quorum.
pub trait Vote {
    type Key: Clone + Eq + Hash + fmt::Debug;

    fn key(&self) -> Self::Key;
}

#[derive(Debug, thiserror::Error)]
#[error("invalid secret key")]
pub struct InvalidSecretKey(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid signature")]
pub struct InvalidSignature(());
