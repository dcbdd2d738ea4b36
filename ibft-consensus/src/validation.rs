use alloy_primitives::B256;
use ibft_types::{Block, Header, PreparedCertificate, RoundChangeCertificate, RoundIdentifier};
use quorum::{QuorumViolation, ValidatorSet};

use crate::{ConsensusError, InvalidPrepared, InvalidProposal};

/// Check a block proposed on top of `parent`.
pub(crate) fn validate_block(
    block: &Block,
    parent: &Header,
    validators: &ValidatorSet,
) -> Result<(), InvalidProposal> {
    let h = &block.header;
    let expected = parent.number + 1;
    if h.number != expected {
        return Err(InvalidProposal::Number {
            got: h.number,
            expected,
        });
    }
    if h.parent_hash != parent.hash() {
        return Err(InvalidProposal::Parent);
    }
    if !h.extra.seals.is_empty() {
        return Err(InvalidProposal::Sealed);
    }
    if !validators.contains(&h.beneficiary) {
        return Err(InvalidProposal::Beneficiary(h.beneficiary));
    }
    Ok(())
}

/// Check that a prepared certificate proves a prepared block in a round
/// before `target`.
pub(crate) fn validate_prepared(
    pc: &PreparedCertificate,
    target: RoundIdentifier,
    validators: &ValidatorSet,
) -> Result<(), InvalidPrepared> {
    let round = pc.round();
    if round.sequence() != target.sequence() || round >= target {
        return Err(InvalidPrepared::Round(round));
    }

    let proposer = pc
        .proposal()
        .recover_signer()
        .map_err(|_| InvalidPrepared::Signature)?;
    if Some(proposer) != round.proposer(validators) {
        return Err(InvalidPrepared::Proposer(proposer));
    }

    let threshold = validators.quorum_size().saturating_sub(1);
    let prepares = pc.prepares();
    if prepares.is_empty() && threshold == 0 {
        return Ok(());
    }
    let signers = prepares.validate(validators, threshold)?;

    let digest = pc.proposal().data().digest();
    if prepares
        .votes()
        .iter()
        .any(|e| e.data().round() != round || e.data().digest() != digest)
    {
        return Err(InvalidPrepared::Digest);
    }
    if signers.contains(&proposer) {
        return Err(InvalidPrepared::ProposerPrepare);
    }
    Ok(())
}

/// Check the round-change quorum justifying a proposal in `round`.
///
/// Returns the digest of the highest prepared block found in the
/// certificate, which the proposal must carry.
pub(crate) fn validate_justification(
    cert: &RoundChangeCertificate,
    round: RoundIdentifier,
    validators: &ValidatorSet,
) -> Result<Option<B256>, ConsensusError> {
    cert.validate(validators, validators.quorum_size())?;
    if let Some(e) = cert.votes().iter().find(|e| e.data().round() != round) {
        return Err(InvalidProposal::JustificationRound(e.data().round()).into());
    }
    for e in cert.votes() {
        if let Some(pc) = e.data().prepared() {
            validate_prepared(pc, round, validators)?
        }
    }
    Ok(highest_prepared(cert).map(|pc| pc.proposal().data().digest()))
}

/// The prepared certificate of the highest round in a round-change quorum.
pub(crate) fn highest_prepared(cert: &RoundChangeCertificate) -> Option<&PreparedCertificate> {
    cert.votes()
        .iter()
        .filter_map(|e| e.data().prepared())
        .max_by_key(|pc| pc.round())
}

impl From<QuorumViolation> for InvalidPrepared {
    fn from(v: QuorumViolation) -> Self {
        Self::Prepares(v)
    }
}
