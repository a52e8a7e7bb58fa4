use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::integrity::{evaluate, Eligibility, Ineligible};
use crate::model::{
    common::Receipt,
    db::{Ballot, Candidate, Election, Voter, VotingRight},
    mongodb::Id,
};

use super::store::{CommitOutcome, LedgerView, VoteStore};

/// A voting right row. `None` once revoked, so a commit holding a stale
/// handle sees the revocation.
type RightRow = Arc<Mutex<Option<VotingRight>>>;

/// Ballots of one election, with the voter tags already used and the voters
/// whose ballot is in `rows`.
#[derive(Default)]
struct BallotLog {
    rows: Vec<Ballot>,
    voter_tags: HashSet<String>,
    voters: HashSet<Id>,
}

/// In-process [`VoteStore`] for development and tests.
///
/// Each voting right sits behind its own mutex, which is the serialisation
/// point for votes on that (voter, election) pair. Lock order is always:
/// rights map, then a right row, then an election's ballot log. Reads never
/// hold more than one of these at a time, so a tally read does not hold up
/// votes. Nothing is persisted.
#[derive(Default)]
pub struct MemoryStore {
    voters: RwLock<HashMap<Id, Voter>>,
    elections: RwLock<HashMap<Id, Election>>,
    candidates: RwLock<HashMap<Id, Candidate>>,
    /// Keyed by (voter ID, election ID).
    rights: RwLock<HashMap<(Id, Id), RightRow>>,
    ballots: RwLock<HashMap<Id, Arc<Mutex<BallotLog>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ballot_log(&self, election_id: Id) -> Arc<Mutex<BallotLog>> {
        if let Some(log) = read(&self.ballots).get(&election_id) {
            return log.clone();
        }
        write(&self.ballots).entry(election_id).or_default().clone()
    }

    /// Append a ballot without touching any voting right. Only for building
    /// deliberately inconsistent ledgers in tests.
    #[cfg(test)]
    pub(crate) fn append_raw_ballot(&self, ballot: Ballot) {
        let log = self.ballot_log(ballot.election_id);
        let mut log = lock(&log);
        log.voter_tags.insert(ballot.voter_tag.clone());
        log.rows.push(ballot);
    }

    /// Overwrite a stored ballot in place. Only for tamper tests.
    #[cfg(test)]
    pub(crate) fn tamper_ballot(&self, election_id: Id, tamper: impl Fn(&mut Ballot)) {
        let log = self.ballot_log(election_id);
        let mut log = lock(&log);
        log.rows.iter_mut().for_each(tamper);
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[rocket::async_trait]
impl VoteStore for MemoryStore {
    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>> {
        Ok(read(&self.voters).get(&voter_id).cloned())
    }

    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(read(&self.elections).get(&election_id).cloned())
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        let mut elections: Vec<_> = read(&self.elections).values().cloned().collect();
        elections.sort_by_key(|e| e.id);
        Ok(elections)
    }

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        Ok(read(&self.candidates).get(&candidate_id).cloned())
    }

    async fn voting_right(&self, voter_id: Id, election_id: Id) -> Result<Option<VotingRight>> {
        let row = read(&self.rights).get(&(voter_id, election_id)).cloned();
        Ok(row.and_then(|row| lock(&row).clone()))
    }

    async fn insert_voter(&self, voter: &Voter) -> Result<()> {
        write(&self.voters).insert(voter.id, voter.clone());
        Ok(())
    }

    async fn insert_election(&self, election: &Election) -> Result<()> {
        write(&self.elections).insert(election.id, election.clone());
        Ok(())
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<()> {
        write(&self.candidates).insert(candidate.id, candidate.clone());
        Ok(())
    }

    async fn upsert_voting_right(
        &self,
        voter: &Voter,
        election_id: Id,
        is_eligible: bool,
        now: DateTime<Utc>,
    ) -> Result<VotingRight> {
        let key = (voter.id, election_id);
        let mut rights = write(&self.rights);
        if let Some(row) = rights.get(&key) {
            let mut row = lock(row);
            if let Some(existing) = row.as_mut() {
                if existing.has_voted {
                    if !is_eligible {
                        return Err(Error::conflict(
                            "Cannot withdraw eligibility after the voter has voted",
                        ));
                    }
                    return Ok(existing.clone());
                }
                existing.is_eligible = is_eligible;
                existing.demographics = voter.demographics.clone();
                return Ok(existing.clone());
            }
        }
        let right =
            VotingRight::grant(voter.id, election_id, voter.demographics.clone(), is_eligible, now);
        rights.insert(key, Arc::new(Mutex::new(Some(right.clone()))));
        Ok(right)
    }

    async fn delete_voting_right(&self, right_id: Id) -> Result<()> {
        let mut rights = write(&self.rights);
        let mut revoked = None;
        for (key, row) in rights.iter() {
            let mut row = lock(row);
            if let Some(right) = row.as_ref().filter(|r| r.id == right_id) {
                if right.has_voted {
                    return Err(Error::conflict(
                        "Cannot revoke a voting right that has been used",
                    ));
                }
                *row = None;
                revoked = Some(*key);
                break;
            }
        }
        match revoked {
            Some(key) => {
                rights.remove(&key);
                Ok(())
            }
            None => Err(Error::not_found(format!("Voting right {right_id}"))),
        }
    }

    async fn commit_vote(
        &self,
        voter_id: Id,
        ballot: &Ballot,
        receipt: &Receipt,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let election = read(&self.elections).get(&ballot.election_id).cloned();
        let voter = read(&self.voters).get(&voter_id).cloned();
        let row = read(&self.rights)
            .get(&(voter_id, ballot.election_id))
            .cloned();

        let Some(row) = row else {
            return Ok(rejection(evaluate(election.as_ref(), voter.as_ref(), None, now)));
        };
        let mut row = lock(&row);
        let Some(right) = row.as_mut() else {
            return Ok(rejection(evaluate(election.as_ref(), voter.as_ref(), None, now)));
        };
        if let Eligibility::Ineligible(reason) =
            evaluate(election.as_ref(), voter.as_ref(), Some(right), now)
        {
            return Ok(CommitOutcome::Rejected(reason));
        }

        {
            let log = self.ballot_log(ballot.election_id);
            let mut log = lock(&log);
            if !log.voter_tags.insert(ballot.voter_tag.clone()) {
                return Ok(CommitOutcome::Rejected(Ineligible::AlreadyVoted));
            }
            log.rows.push(ballot.clone());
            log.voters.insert(voter_id);
        }
        right.has_voted = true;
        right.vote_hash = Some(receipt.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn ledger_view(&self, election_id: Id) -> Result<Option<LedgerView>> {
        let Some(election) = read(&self.elections).get(&election_id).cloned() else {
            return Ok(None);
        };

        let mut candidates: Vec<_> = read(&self.candidates)
            .values()
            .filter(|c| c.election_id == election_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| (c.registered_at, c.id));

        // Ballots first. A vote appends its ballot and marks its right under
        // the right's lock, so any right marked after this copy belongs to a
        // ballot the copy missed.
        let (ballots, counted) = {
            let log = self.ballot_log(election_id);
            let log = lock(&log);
            (log.rows.clone(), log.voters.clone())
        };

        let mut rows: Vec<((Id, Id), RightRow)> = read(&self.rights)
            .iter()
            .filter(|((_, election), _)| *election == election_id)
            .map(|(key, row)| (*key, row.clone()))
            .collect();
        rows.sort_by_key(|(key, _)| *key);
        let rights = rows
            .iter()
            .filter_map(|(_, row)| lock(row).clone())
            .map(|mut right| {
                if right.has_voted && !counted.contains(&right.voter_id) {
                    right.has_voted = false;
                    right.vote_hash = None;
                }
                right
            })
            .collect();

        Ok(Some(LedgerView {
            election,
            candidates,
            ballots,
            rights,
        }))
    }
}

fn rejection(eligibility: Eligibility) -> CommitOutcome {
    match eligibility {
        Eligibility::Ineligible(reason) => CommitOutcome::Rejected(reason),
        // Unreachable without a voting right, but never treat it as a commit.
        Eligibility::Eligible => CommitOutcome::Rejected(Ineligible::NotRegistered),
    }
}
