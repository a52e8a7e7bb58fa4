//! The vote ledger: the only component that writes ballots.

mod memory;
mod mongo;
mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{CommitOutcome, LedgerView, VoteStore};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use rocket::tokio::time::sleep;
use serde::Serialize;

use crate::error::{Error, Result, VoteError};
use crate::integrity::{
    BallotEncoder, Eligibility, EligibilityGate, Ineligible, IntegrityKeys, ReceiptGenerator,
};
use crate::model::{
    api::{ResultsDump, VotingRightDesc},
    common::{truncate_to_millis, Receipt},
    mongodb::{id_as_hex, Id},
};
use crate::tally::{self, ResultCache};

/// The store as held in managed state and shared between components.
pub type SharedStore = Arc<dyn VoteStore>;

/// How often, and how patiently, to repeat a vote transaction that failed
/// for a transient reason.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1 << attempt.saturating_sub(1).min(10))
    }
}

/// Owns the vote write path and everything that reads the ledger back for
/// verification.
#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
    gate: EligibilityGate,
    encoder: BallotEncoder,
    receipts: ReceiptGenerator,
    retry: RetryPolicy,
    cache: ResultCache,
}

impl VoteLedger {
    pub fn new(
        store: Arc<dyn VoteStore>,
        keys: IntegrityKeys,
        retry: RetryPolicy,
        cache: ResultCache,
    ) -> Self {
        Self {
            gate: EligibilityGate::new(store.clone()),
            encoder: BallotEncoder::new(keys.clone()),
            receipts: ReceiptGenerator::new(keys),
            store,
            retry,
            cache,
        }
    }

    pub async fn check_eligibility(&self, voter_id: Id, election_id: Id) -> Result<Eligibility> {
        self.gate.check_eligibility(voter_id, election_id).await
    }

    /// Record the voter's single vote and return its receipt.
    ///
    /// Eligibility is checked before any work is done and again inside the
    /// transaction. Transient storage failures are retried with exponential
    /// backoff; once the attempts run out the voter gets `LedgerUnavailable`
    /// and nothing has been recorded on their behalf unless a later receipt
    /// lookup says otherwise.
    pub async fn cast_vote(
        &self,
        voter_id: Id,
        election_id: Id,
        candidate_id: Id,
    ) -> Result<Receipt> {
        match self.gate.check_eligibility(voter_id, election_id).await? {
            Eligibility::Eligible => {}
            Eligibility::Ineligible(Ineligible::AlreadyVoted) => {
                return Err(VoteError::DuplicateVote.into())
            }
            Eligibility::Ineligible(reason) => return Err(VoteError::from(reason).into()),
        }

        let candidate = self.store.candidate(candidate_id).await?;
        let ballot = self
            .encoder
            .encode(candidate.as_ref(), election_id, voter_id)?
            .into_ballot(truncate_to_millis(Utc::now()));
        let receipt = self.receipts.issue_receipt(&ballot);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .commit_vote(voter_id, &ballot, &receipt, Utc::now())
                .await
            {
                Ok(CommitOutcome::Committed) => break,
                Ok(CommitOutcome::Rejected(Ineligible::AlreadyVoted)) => {
                    // A failed attempt may have committed without telling us.
                    if attempt > 1 && self.holds_receipt(voter_id, election_id, &receipt).await? {
                        break;
                    }
                    return Err(VoteError::DuplicateVote.into());
                }
                Ok(CommitOutcome::Rejected(reason)) => return Err(VoteError::from(reason).into()),
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        error!(
                            "Giving up on a vote in election {election_id} after {attempt} attempts: {e}"
                        );
                        return Err(VoteError::LedgerUnavailable.into());
                    }
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Vote attempt {attempt} in election {election_id} failed ({e}), retrying in {}ms",
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        info!("Recorded a ballot in election {election_id}");
        self.cache.invalidate(election_id);
        Ok(receipt)
    }

    async fn holds_receipt(&self, voter_id: Id, election_id: Id, receipt: &Receipt) -> Result<bool> {
        let right = self.store.voting_right(voter_id, election_id).await?;
        Ok(right.and_then(|r| r.vote_hash).as_ref() == Some(receipt))
    }

    /// The receipt stored for this voter's vote, if they have voted.
    pub async fn receipt(&self, voter_id: Id, election_id: Id) -> Result<Option<Receipt>> {
        if self.store.election(election_id).await?.is_none() {
            return Err(VoteError::InvalidElection.into());
        }
        let right = self.store.voting_right(voter_id, election_id).await?;
        Ok(right.and_then(|r| r.vote_hash))
    }

    /// Does any ballot recorded in the election produce this receipt?
    pub async fn verify_receipt(&self, election_id: Id, receipt: &Receipt) -> Result<bool> {
        let view = self.view(election_id).await?;
        Ok(view
            .ballots
            .iter()
            .any(|ballot| &self.receipts.issue_receipt(ballot) == receipt))
    }

    /// A tally snapshot and the sorted receipt list, both taken from the same
    /// view of the ledger.
    pub async fn results_dump(&self, election_id: Id) -> Result<ResultsDump> {
        let view = self.view(election_id).await?;
        let snapshot = tally::compute(&view, Utc::now()).map_err(|defect| {
            error!("Refusing to publish results for election {election_id}: {defect}");
            Error::from(defect)
        })?;
        let mut receipts: Vec<_> = view
            .ballots
            .iter()
            .map(|ballot| self.receipts.issue_receipt(ballot))
            .collect();
        receipts.sort();
        Ok(ResultsDump { snapshot, receipts })
    }

    /// Grant the voter a right in the election, or update an unused one.
    pub async fn grant_voting_right(
        &self,
        voter_id: Id,
        election_id: Id,
        is_eligible: bool,
    ) -> Result<VotingRightDesc> {
        let voter = self
            .store
            .voter(voter_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
        if self.store.election(election_id).await?.is_none() {
            return Err(VoteError::InvalidElection.into());
        }
        let right = self
            .store
            .upsert_voting_right(&voter, election_id, is_eligible, Utc::now())
            .await?;
        info!("Voting right {} for election {election_id} set to eligible={is_eligible}", right.id);
        self.cache.invalidate(election_id);
        Ok(right.into())
    }

    pub async fn revoke_voting_right(&self, right_id: Id) -> Result<()> {
        self.store.delete_voting_right(right_id).await?;
        info!("Revoked voting right {right_id}");
        self.cache.invalidate_all();
        Ok(())
    }

    /// Recompute every commitment and receipt in the election and check the
    /// ledger's counting invariants.
    pub async fn audit(&self, election_id: Id) -> Result<LedgerAudit> {
        let view = self.view(election_id).await?;
        let candidates: HashSet<Id> = view.candidates.iter().map(|c| c.id).collect();
        let mut findings = Vec::new();

        let mut voter_tags = HashSet::new();
        let mut recomputed = HashSet::new();
        for ballot in &view.ballots {
            if !self.encoder.verify(ballot) {
                findings.push(AuditFinding::CommitmentMismatch { ballot_id: ballot.id });
            }
            if !candidates.contains(&ballot.candidate_id) {
                findings.push(AuditFinding::UnknownCandidate { ballot_id: ballot.id });
            }
            if !voter_tags.insert(ballot.voter_tag.as_str()) {
                findings.push(AuditFinding::DuplicateVoterTag { ballot_id: ballot.id });
            }
            recomputed.insert(self.receipts.issue_receipt(ballot));
        }

        let stored: HashSet<Receipt> = view
            .rights
            .iter()
            .filter(|r| r.has_voted)
            .filter_map(|r| r.vote_hash.clone())
            .collect();
        let voted_rights = view.rights.iter().filter(|r| r.has_voted).count() as u64;
        let ballots = view.ballots.len() as u64;
        if voted_rights != ballots {
            findings.push(AuditFinding::CountMismatch {
                ballots,
                voted_rights,
            });
        }
        for ballot in &view.ballots {
            if !stored.contains(&self.receipts.issue_receipt(ballot)) {
                findings.push(AuditFinding::UnreceiptedBallot { ballot_id: ballot.id });
            }
        }
        let mut unmatched: Vec<_> = stored.difference(&recomputed).cloned().collect();
        unmatched.sort();
        findings.extend(
            unmatched
                .into_iter()
                .map(|receipt| AuditFinding::UnmatchedReceipt { receipt }),
        );

        if findings.is_empty() {
            info!("Ledger audit of election {election_id} passed ({ballots} ballots)");
        } else {
            error!(
                "Ledger audit of election {election_id} found {} problem(s)",
                findings.len()
            );
        }
        Ok(LedgerAudit {
            election_id,
            ballots,
            voted_rights,
            clean: findings.is_empty(),
            findings,
        })
    }

    async fn view(&self, election_id: Id) -> Result<LedgerView> {
        self.store
            .ledger_view(election_id)
            .await?
            .ok_or_else(|| VoteError::InvalidElection.into())
    }
}

/// Outcome of [`VoteLedger::audit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    #[serde(with = "id_as_hex")]
    pub election_id: Id,
    pub ballots: u64,
    pub voted_rights: u64,
    pub findings: Vec<AuditFinding>,
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuditFinding {
    /// The stored commitment does not open to the stored candidate.
    CommitmentMismatch {
        #[serde(rename = "ballotId", with = "id_as_hex")]
        ballot_id: Id,
    },
    UnknownCandidate {
        #[serde(rename = "ballotId", with = "id_as_hex")]
        ballot_id: Id,
    },
    DuplicateVoterTag {
        #[serde(rename = "ballotId", with = "id_as_hex")]
        ballot_id: Id,
    },
    /// Ballots and used voting rights disagree.
    CountMismatch {
        ballots: u64,
        #[serde(rename = "votedRights")]
        voted_rights: u64,
    },
    /// No voter holds the receipt for this ballot.
    UnreceiptedBallot {
        #[serde(rename = "ballotId", with = "id_as_hex")]
        ballot_id: Id,
    },
    /// A voter holds a receipt that matches no ballot.
    UnmatchedReceipt { receipt: Receipt },
}
