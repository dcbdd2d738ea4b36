use alloy_primitives::Address;
use alloy_rlp::{BufMut, Decodable, Encodable, Header};

use crate::{InvalidSignature, Keypair, Signable, Signature, ValidatorSet};

/// Status of envelopes whose signature has not been checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Unchecked;

/// Status of envelopes whose signer has been recovered and found to be a
/// validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Validated {
    signer: Address,
}

/// Signed data.
///
/// The signer is never part of the encoding. It is recovered from the
/// signature over the data's signing digest, which is the only way to obtain
/// a `Validated` envelope apart from signing the data locally.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Envelope<D, S = Validated> {
    data: D,
    signature: Signature,
    status: S,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthenticationError {
    #[error("signer can not be recovered from signature")]
    InvalidSignature,

    #[error("signer {0} is not a validator")]
    NotAValidator(Address),
}

impl From<InvalidSignature> for AuthenticationError {
    fn from(_: InvalidSignature) -> Self {
        Self::InvalidSignature
    }
}

impl<D, S> Envelope<D, S> {
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl<D: Signable> Envelope<D, Validated> {
    /// Create a (validated) envelope by signing data with a private key.
    pub fn signed(data: D, keypair: &Keypair) -> Self {
        let signature = keypair.sign(&data.signing_digest());
        Self {
            data,
            signature,
            status: Validated {
                signer: keypair.address(),
            },
        }
    }
}

impl<D> Envelope<D, Validated> {
    pub fn signer(&self) -> Address {
        self.status.signer
    }

    pub fn into_unchecked(self) -> Envelope<D, Unchecked> {
        Envelope {
            data: self.data,
            signature: self.signature,
            status: Unchecked,
        }
    }
}

impl<D: Clone> Envelope<D, Validated> {
    pub fn to_unchecked(&self) -> Envelope<D, Unchecked> {
        self.clone().into_unchecked()
    }
}

impl<D: Signable> Envelope<D, Unchecked> {
    pub fn new(data: D, signature: Signature) -> Self {
        Self {
            data,
            signature,
            status: Unchecked,
        }
    }

    pub fn recover_signer(&self) -> Result<Address, InvalidSignature> {
        self.signature.recover(&self.data.signing_digest())
    }

    /// Transition from an unchecked envelope to a validated one.
    pub fn validated(
        self,
        validators: &ValidatorSet,
    ) -> Result<Envelope<D, Validated>, AuthenticationError> {
        let signer = self.recover_signer()?;
        if !validators.contains(&signer) {
            return Err(AuthenticationError::NotAValidator(signer));
        }
        Ok(Envelope {
            data: self.data,
            signature: self.signature,
            status: Validated { signer },
        })
    }
}

impl<D: Encodable, S> Envelope<D, S> {
    fn payload_length(&self) -> usize {
        self.data.length() + self.signature.length()
    }
}

impl<D: Encodable, S> Encodable for Envelope<D, S> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.data.encode(out);
        self.signature.encode(out);
    }

    fn length(&self) -> usize {
        let n = self.payload_length();
        n + alloy_rlp::length_of_length(n)
    }
}

impl<D: Decodable> Decodable for Envelope<D, Unchecked> {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = Header::decode_bytes(buf, true)?;
        let data = D::decode(&mut payload)?;
        let signature = Signature::decode(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(Self {
            data,
            signature,
            status: Unchecked,
        })
    }
}
