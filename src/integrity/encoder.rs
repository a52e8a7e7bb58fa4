use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::Mac;
use rand::{rngs::OsRng, CryptoRng, RngCore};

use crate::error::VoteError;
use crate::model::{
    db::{Ballot, Candidate},
    mongodb::Id,
};

use super::keys::IntegrityKeys;

pub const NONCE_LEN: usize = 32;
pub const DIGEST_LEN: usize = 32;

/// A committed vote, ready to be written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotPayload {
    pub election_id: Id,
    pub candidate_id: Id,
    pub nonce: [u8; NONCE_LEN],
    pub commitment: [u8; DIGEST_LEN],
    pub voter_tag: [u8; DIGEST_LEN],
}

impl BallotPayload {
    /// Turn the payload into a ledger row cast at the given time.
    pub fn into_ballot(self, cast_at: DateTime<Utc>) -> Ballot {
        Ballot {
            id: Id::new(),
            election_id: self.election_id,
            candidate_id: self.candidate_id,
            commitment: HEXLOWER.encode(&self.commitment),
            nonce: HEXLOWER.encode(&self.nonce),
            voter_tag: HEXLOWER.encode(&self.voter_tag),
            cast_at,
        }
    }
}

/// Turns a candidate selection into a committed ballot.
///
/// The commitment is an HMAC over (election, candidate, nonce) under a server
/// key: a fresh nonce makes every payload unique, and without the key nobody
/// can produce a commitment that opens to a different candidate.
#[derive(Debug, Clone)]
pub struct BallotEncoder {
    keys: IntegrityKeys,
}

impl BallotEncoder {
    pub fn new(keys: IntegrityKeys) -> Self {
        Self { keys }
    }

    /// Encode a vote for `candidate` in `election_id` by `voter_id`.
    ///
    /// `candidate` is the stored record looked up by the caller; `None`, or a
    /// candidate standing in a different election, is `InvalidCandidate`.
    pub fn encode(
        &self,
        candidate: Option<&Candidate>,
        election_id: Id,
        voter_id: Id,
    ) -> Result<BallotPayload, VoteError> {
        self.encode_with_rng(candidate, election_id, voter_id, &mut OsRng)
    }

    pub fn encode_with_rng(
        &self,
        candidate: Option<&Candidate>,
        election_id: Id,
        voter_id: Id,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<BallotPayload, VoteError> {
        let candidate = candidate
            .filter(|c| c.election_id == election_id)
            .ok_or(VoteError::InvalidCandidate)?;

        let mut nonce = [0; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        Ok(BallotPayload {
            election_id,
            candidate_id: candidate.id,
            commitment: self.commitment(election_id, candidate.id, &nonce),
            voter_tag: self.voter_tag(voter_id, election_id),
            nonce,
        })
    }

    pub fn commitment(&self, election_id: Id, candidate_id: Id, nonce: &[u8]) -> [u8; DIGEST_LEN] {
        let mut mac = self.keys.commitment_mac();
        mac.update(&election_id.to_bytes());
        mac.update(&candidate_id.to_bytes());
        mac.update(nonce);
        digest(mac)
    }

    /// The irreversible stand-in for a voter's identity on their ballot.
    pub fn voter_tag(&self, voter_id: Id, election_id: Id) -> [u8; DIGEST_LEN] {
        let mut mac = self.keys.linkage_mac();
        mac.update(&voter_id.to_bytes());
        mac.update(&election_id.to_bytes());
        digest(mac)
    }

    /// Does the stored ballot's commitment still open to its candidate?
    pub fn verify(&self, ballot: &Ballot) -> bool {
        let (Ok(nonce), Ok(commitment)) = (
            HEXLOWER.decode(ballot.nonce.as_bytes()),
            HEXLOWER.decode(ballot.commitment.as_bytes()),
        ) else {
            return false;
        };
        if nonce.len() != NONCE_LEN {
            return false;
        }
        let mut mac = self.keys.commitment_mac();
        mac.update(&ballot.election_id.to_bytes());
        mac.update(&ballot.candidate_id.to_bytes());
        mac.update(&nonce);
        mac.verify_slice(&commitment).is_ok()
    }
}

fn digest(mac: super::keys::HmacSha256) -> [u8; DIGEST_LEN] {
    let mut out = [0; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn encoder() -> BallotEncoder {
        BallotEncoder::new(IntegrityKeys::derive(b"encoder tests"))
    }

    #[test]
    fn same_vote_never_encodes_identically() {
        let election = Id::new();
        let candidate = Candidate::example(election, "Ada");
        let voter = Id::new();

        let first = encoder().encode(Some(&candidate), election, voter).unwrap();
        let second = encoder().encode(Some(&candidate), election, voter).unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.commitment, second.commitment);
        // The voter tag is stable so the ledger can detect the duplicate.
        assert_eq!(first.voter_tag, second.voter_tag);
    }

    #[test]
    fn candidate_from_another_election_is_rejected() {
        let election = Id::new();
        let elsewhere = Candidate::example(Id::new(), "Grace");

        assert_eq!(
            encoder().encode(Some(&elsewhere), election, Id::new()),
            Err(VoteError::InvalidCandidate)
        );
        assert_eq!(
            encoder().encode(None, election, Id::new()),
            Err(VoteError::InvalidCandidate)
        );
    }

    #[test]
    fn stored_ballot_verifies_until_tampered() {
        let election = Id::new();
        let ada = Candidate::example(election, "Ada");
        let grace = Candidate::example(election, "Grace");
        let encoder = encoder();

        let ballot = encoder
            .encode(Some(&ada), election, Id::new())
            .unwrap()
            .into_ballot(Utc::now());
        assert!(encoder.verify(&ballot));

        let mut swapped = ballot.clone();
        swapped.candidate_id = grace.id;
        assert!(!encoder.verify(&swapped));

        let mut garbled = ballot;
        garbled.nonce = "not hex".to_string();
        assert!(!encoder.verify(&garbled));
    }

    #[test]
    fn voter_tag_depends_on_voter_and_election() {
        let encoder = encoder();
        let (voter, election) = (Id::new(), Id::new());
        let tag = encoder.voter_tag(voter, election);

        assert_ne!(tag, encoder.voter_tag(Id::new(), election));
        assert_ne!(tag, encoder.voter_tag(voter, Id::new()));
        let candidate = Candidate::example(election, "Ada");
        let ballot = encoder
            .encode(Some(&candidate), election, voter)
            .unwrap()
            .into_ballot(Utc::now());
        assert_eq!(ballot.voter_tag, HEXLOWER.encode(&tag));
    }

    #[test]
    fn commitments_need_the_server_key() {
        let election = Id::new();
        let candidate = Candidate::example(election, "Ada");
        let nonce = [7; NONCE_LEN];

        let ours = encoder().commitment(election, candidate.id, &nonce);
        let theirs = BallotEncoder::new(IntegrityKeys::derive(b"guessed key"))
            .commitment(election, candidate.id, &nonce);
        assert_ne!(ours, theirs);
    }
}
