use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, VoteError};
use crate::ledger::VoteStore;
use crate::model::{
    common::ElectionStatus,
    db::{Election, Voter, VotingRight},
    mongodb::Id,
};

/// Why a vote cannot be accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ineligible {
    InvalidElection,
    ElectionNotStarted,
    ElectionEnded,
    NotRegistered,
    NotEligible,
    AlreadyVoted,
}

impl From<Ineligible> for VoteError {
    fn from(reason: Ineligible) -> Self {
        match reason {
            Ineligible::InvalidElection => VoteError::InvalidElection,
            Ineligible::ElectionNotStarted => VoteError::ElectionNotStarted,
            Ineligible::ElectionEnded => VoteError::ElectionEnded,
            Ineligible::NotRegistered => VoteError::NotRegistered,
            Ineligible::NotEligible => VoteError::NotEligible,
            Ineligible::AlreadyVoted => VoteError::AlreadyVoted,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(Ineligible),
}

/// Decide whether a vote may be accepted, given the committed records for the
/// (voter, election) pair at time `now`. Pure: the ledger runs the same rules
/// again inside its transaction.
pub fn evaluate(
    election: Option<&Election>,
    voter: Option<&Voter>,
    right: Option<&VotingRight>,
    now: DateTime<Utc>,
) -> Eligibility {
    use Ineligible::*;

    let Some(election) = election else {
        return Eligibility::Ineligible(InvalidElection);
    };
    match election.status_at(now) {
        ElectionStatus::Upcoming => return Eligibility::Ineligible(ElectionNotStarted),
        ElectionStatus::Completed => return Eligibility::Ineligible(ElectionEnded),
        ElectionStatus::Ongoing => {}
    }
    let Some(right) = right else {
        return Eligibility::Ineligible(NotRegistered);
    };
    let voter_active = voter.map(Voter::is_active).unwrap_or(false);
    if !right.is_eligible || !voter_active {
        return Eligibility::Ineligible(NotEligible);
    }
    if right.has_voted {
        return Eligibility::Ineligible(AlreadyVoted);
    }
    Eligibility::Eligible
}

/// Read-only pre-check run before any encoding work is done.
#[derive(Clone)]
pub struct EligibilityGate {
    store: Arc<dyn VoteStore>,
}

impl EligibilityGate {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    pub async fn check_eligibility(&self, voter_id: Id, election_id: Id) -> Result<Eligibility> {
        self.check_at(voter_id, election_id, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        voter_id: Id,
        election_id: Id,
        now: DateTime<Utc>,
    ) -> Result<Eligibility> {
        let election = self.store.election(election_id).await?;
        if election.is_none() {
            return Ok(Eligibility::Ineligible(Ineligible::InvalidElection));
        }
        let right = self.store.voting_right(voter_id, election_id).await?;
        let voter = self.store.voter(voter_id).await?;
        Ok(evaluate(election.as_ref(), voter.as_ref(), right.as_ref(), now))
    }
}
