use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::integrity::Ineligible;
use crate::model::{
    common::Receipt,
    db::{Ballot, Candidate, Election, Voter, VotingRight},
    mongodb::Id,
};

/// Result of the atomic vote transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The ballot was appended and the voting right flipped to voted.
    Committed,
    /// Nothing was written. `AlreadyVoted` covers both a failed compare-and-set
    /// and a unique-index violation on the ballot.
    Rejected(Ineligible),
}

/// A consistent, point-in-time view of everything recorded for one election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerView {
    pub election: Election,
    /// Ordered by registration time, then ID.
    pub candidates: Vec<Candidate>,
    pub ballots: Vec<Ballot>,
    pub rights: Vec<VotingRight>,
}

/// Storage backend for the ledger and the records it depends on.
///
/// Implementations must make [`VoteStore::commit_vote`] atomic and serialise
/// concurrent commits for the same (voter, election) pair without a lock
/// shared by other pairs, and must return a consistent snapshot from
/// [`VoteStore::ledger_view`].
#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>>;

    async fn election(&self, election_id: Id) -> Result<Option<Election>>;

    async fn elections(&self) -> Result<Vec<Election>>;

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>>;

    async fn voting_right(&self, voter_id: Id, election_id: Id) -> Result<Option<VotingRight>>;

    // Records owned by the external admin layer. Used for seeding and tests.

    async fn insert_voter(&self, voter: &Voter) -> Result<()>;

    async fn insert_election(&self, election: &Election) -> Result<()>;

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<()>;

    /// Create the voter's right for the election, or update an unused one.
    ///
    /// Once the right is used, its demographics are frozen and clearing
    /// eligibility is a conflict; granting it again returns it unchanged.
    async fn upsert_voting_right(
        &self,
        voter: &Voter,
        election_id: Id,
        is_eligible: bool,
        now: DateTime<Utc>,
    ) -> Result<VotingRight>;

    /// Delete an unused right. Not found if absent, conflict if used.
    async fn delete_voting_right(&self, right_id: Id) -> Result<()>;

    /// The vote transaction: re-check eligibility against committed state at
    /// `now`, compare-and-set the voter's right to voted with `receipt` as its
    /// vote hash, and append `ballot`. All or nothing.
    async fn commit_vote(
        &self,
        voter_id: Id,
        ballot: &Ballot,
        receipt: &Receipt,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome>;

    /// `None` if the election does not exist.
    async fn ledger_view(&self, election_id: Id) -> Result<Option<LedgerView>>;
}
