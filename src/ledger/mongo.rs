use chrono::{DateTime, Utc};
use log::{debug, warn};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    options::{
        Acknowledgment, FindOneAndUpdateOptions, ReadConcern, ReturnDocument, SessionOptions,
        TransactionOptions, WriteConcern,
    },
    Client, ClientSession, Database, SessionCursor,
};
use rocket::futures::TryStreamExt;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::integrity::{evaluate, Eligibility, Ineligible};
use crate::model::{
    common::{Demographics, Receipt},
    db::{Ballot, Candidate, Election, Voter, VotingRight},
    mongodb::{
        ensure_indexes_exist, is_duplicate_key_error, is_unknown_commit_result, Coll, Id,
    },
};

use super::store::{CommitOutcome, LedgerView, VoteStore};

/// [`VoteStore`] backed by a MongoDB replica set.
///
/// Votes run in multi-document transactions with snapshot read concern and
/// majority writes. The voting right is flipped with a conditional update, so
/// a concurrent vote for the same pair either conflicts at the server (and is
/// retried by the ledger) or finds the right already used.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    rights: Coll<VotingRight>,
    ballots: Coll<Ballot>,
}

impl MongoStore {
    /// Wrap an existing database. Does not check its indexes.
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            voters: Coll::from_db(db),
            elections: Coll::from_db(db),
            candidates: Coll::from_db(db),
            rights: Coll::from_db(db),
            ballots: Coll::from_db(db),
        }
    }

    /// Wrap a database after making sure the ledger's unique indexes exist.
    pub async fn connect(client: Client, db: Database) -> Result<Self, DbError> {
        ensure_indexes_exist(&db).await?;
        Ok(Self::new(client, &db))
    }

    /// The body of the vote transaction. The caller commits or aborts.
    async fn commit_in_session(
        &self,
        voter_id: Id,
        ballot: &Ballot,
        receipt: &Receipt,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<CommitOutcome> {
        let election = self
            .elections
            .find_one_with_session(ballot.election_id.as_doc(), None, session)
            .await?;
        let voter = self
            .voters
            .find_one_with_session(voter_id.as_doc(), None, session)
            .await?;
        let right_filter = right_filter(voter_id, ballot.election_id);
        let right = self
            .rights
            .find_one_with_session(right_filter.clone(), None, session)
            .await?;
        if let Eligibility::Ineligible(reason) =
            evaluate(election.as_ref(), voter.as_ref(), right.as_ref(), now)
        {
            return Ok(CommitOutcome::Rejected(reason));
        }

        // Compare-and-set on the right.
        let mut unused = right_filter;
        unused.insert("is_eligible", true);
        unused.insert("has_voted", false);
        let update = doc! {
            "$set": {
                "has_voted": true,
                "vote_hash": receipt.clone(),
            }
        };
        let flipped = self
            .rights
            .update_one_with_session(unused, update, None, session)
            .await?;
        if flipped.modified_count != 1 {
            return Ok(CommitOutcome::Rejected(Ineligible::AlreadyVoted));
        }

        match self
            .ballots
            .insert_one_with_session(ballot, None, session)
            .await
        {
            Ok(_) => Ok(CommitOutcome::Committed),
            Err(e) if is_duplicate_key_error(&e) => {
                Ok(CommitOutcome::Rejected(Ineligible::AlreadyVoted))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn right_filter(voter_id: Id, election_id: Id) -> Document {
    doc! {
        "voter_id": voter_id,
        "election_id": election_id,
    }
}

fn demographics_doc(demographics: &Demographics) -> Document {
    doc! {
        "faculty": &demographics.faculty,
        "major": &demographics.major,
        "cohort": i32::from(demographics.cohort),
    }
}

async fn drain<T>(mut cursor: SessionCursor<T>, session: &mut ClientSession) -> Result<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut rows = Vec::new();
    while let Some(row) = cursor.next(session).await {
        rows.push(row?);
    }
    Ok(rows)
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>> {
        Ok(self.voters.find_one(voter_id.as_doc(), None).await?)
    }

    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(self.elections.find_one(election_id.as_doc(), None).await?)
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        Ok(self.elections.find(None, None).await?.try_collect().await?)
    }

    async fn candidate(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidates.find_one(candidate_id.as_doc(), None).await?)
    }

    async fn voting_right(&self, voter_id: Id, election_id: Id) -> Result<Option<VotingRight>> {
        Ok(self
            .rights
            .find_one(right_filter(voter_id, election_id), None)
            .await?)
    }

    async fn insert_voter(&self, voter: &Voter) -> Result<()> {
        self.voters.insert_one(voter, None).await?;
        Ok(())
    }

    async fn insert_election(&self, election: &Election) -> Result<()> {
        self.elections.insert_one(election, None).await?;
        Ok(())
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<()> {
        self.candidates.insert_one(candidate, None).await?;
        Ok(())
    }

    async fn upsert_voting_right(
        &self,
        voter: &Voter,
        election_id: Id,
        is_eligible: bool,
        now: DateTime<Utc>,
    ) -> Result<VotingRight> {
        // Only unused rights match; a used one makes the upsert collide with
        // the unique (voter, election) index instead.
        let mut unused = right_filter(voter.id, election_id);
        unused.insert("has_voted", false);
        let update = doc! {
            "$set": {
                "is_eligible": is_eligible,
                "demographics": demographics_doc(&voter.demographics),
            },
            "$setOnInsert": {
                "_id": Id::new(),
                "granted_at": BsonDateTime::from_chrono(now),
            },
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        match self
            .rights
            .find_one_and_update(unused, update, options)
            .await
        {
            Ok(Some(right)) => Ok(right),
            Ok(None) => Err(Error::Transient(
                "Upsert of voting right returned no document".to_string(),
            )),
            Err(e) if is_duplicate_key_error(&e) => {
                let used = self
                    .voting_right(voter.id, election_id)
                    .await?
                    .ok_or_else(|| Error::Transient(e.to_string()))?;
                if !is_eligible {
                    return Err(Error::conflict(
                        "Cannot withdraw eligibility after the voter has voted",
                    ));
                }
                Ok(used)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_voting_right(&self, right_id: Id) -> Result<()> {
        let mut unused = right_id.as_doc();
        unused.insert("has_voted", false);
        let deleted = self.rights.delete_one(unused, None).await?;
        if deleted.deleted_count == 1 {
            return Ok(());
        }
        match self.rights.find_one(right_id.as_doc(), None).await? {
            Some(_) => Err(Error::conflict(
                "Cannot revoke a voting right that has been used",
            )),
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
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;

        match self
            .commit_in_session(voter_id, ballot, receipt, now, &mut session)
            .await
        {
            Ok(CommitOutcome::Committed) => match session.commit_transaction().await {
                Ok(()) => Ok(CommitOutcome::Committed),
                Err(e) => {
                    if is_unknown_commit_result(&e) {
                        warn!("Commit of ballot {} has an unknown outcome", ballot.id);
                    }
                    Err(e.into())
                }
            },
            Ok(rejected) => {
                session.abort_transaction().await?;
                Ok(rejected)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    debug!("Abort after failed vote transaction also failed: {abort}");
                }
                Err(e)
            }
        }
    }

    async fn ledger_view(&self, election_id: Id) -> Result<Option<LedgerView>> {
        // Every read shares one snapshot of the election's data.
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let Some(election) = self
            .elections
            .find_one_with_session(election_id.as_doc(), None, &mut session)
            .await?
        else {
            return Ok(None);
        };

        let filter = doc! { "election_id": election_id };
        let cursor = self
            .candidates
            .find_with_session(filter.clone(), None, &mut session)
            .await?;
        let mut candidates = drain(cursor, &mut session).await?;
        candidates.sort_by_key(|c| (c.registered_at, c.id));

        let cursor = self
            .ballots
            .find_with_session(filter.clone(), None, &mut session)
            .await?;
        let ballots = drain(cursor, &mut session).await?;

        let cursor = self
            .rights
            .find_with_session(filter, None, &mut session)
            .await?;
        let rights = drain(cursor, &mut session).await?;

        Ok(Some(LedgerView {
            election,
            candidates,
            ballots,
            rights,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mongodb::Database;

    use super::*;
    use crate::error::VoteError;
    use crate::integrity::{BallotEncoder, IntegrityKeys, ReceiptGenerator};
    use crate::ledger::{RetryPolicy, SharedStore, VoteLedger};
    use crate::tally::{ResultCache, TallyEngine};

    async fn seed(store: &MongoStore) -> (Election, Candidate, Voter) {
        let election = Election::ongoing_example();
        let candidate = Candidate::example(election.id, "Ada");
        let voter = Voter::example(Demographics::engineering());
        store.insert_election(&election).await.unwrap();
        store.insert_candidate(&candidate).await.unwrap();
        store.insert_voter(&voter).await.unwrap();
        store
            .upsert_voting_right(&voter, election.id, true, Utc::now())
            .await
            .unwrap();
        (election, candidate, voter)
    }

    fn ballot_for(election: &Election, candidate: &Candidate, voter: &Voter) -> (Ballot, Receipt) {
        let keys = IntegrityKeys::derive(b"mongo store tests");
        let ballot = BallotEncoder::new(keys.clone())
            .encode(Some(candidate), election.id, voter.id)
            .unwrap()
            .into_ballot(crate::model::common::truncate_to_millis(Utc::now()));
        let receipt = ReceiptGenerator::new(keys).issue_receipt(&ballot);
        (ballot, receipt)
    }

    #[backend_test(mongodb)]
    async fn vote_transaction_commits_once(store: MongoStore, ballots: Coll<Ballot>) {
        let (election, candidate, voter) = seed(&store).await;
        let (first, first_receipt) = ballot_for(&election, &candidate, &voter);
        let (second, second_receipt) = ballot_for(&election, &candidate, &voter);

        let outcome = store
            .commit_vote(voter.id, &first, &first_receipt, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);

        let outcome = store
            .commit_vote(voter.id, &second, &second_receipt, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Rejected(Ineligible::AlreadyVoted));

        assert_eq!(ballots.count_documents(None, None).await.unwrap(), 1);
        let right = store
            .voting_right(voter.id, election.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(right.vote_hash, Some(first_receipt));
    }

    #[backend_test(mongodb)]
    async fn concurrent_votes_record_one_ballot(store: MongoStore, db: Database) {
        const ATTEMPTS: usize = 8;
        let (election, candidate, voter) = seed(&store).await;
        let store: SharedStore = Arc::new(store);
        let cache = ResultCache::new(TallyEngine::new(store.clone()), chrono::Duration::zero());
        // Write conflicts are retried until the loser sees the used right.
        let retry = RetryPolicy {
            max_attempts: 20,
            base_delay: std::time::Duration::from_millis(5),
        };
        let ledger = VoteLedger::new(
            store.clone(),
            IntegrityKeys::derive(b"mongo store tests"),
            retry,
            cache,
        );

        let attempts: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let ledger = ledger.clone();
                let (voter_id, election_id, candidate_id) = (voter.id, election.id, candidate.id);
                rocket::tokio::spawn(async move {
                    ledger.cast_vote(voter_id, election_id, candidate_id).await
                })
            })
            .collect();
        let mut receipts = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(receipt) => receipts.push(receipt),
                Err(Error::Vote(VoteError::DuplicateVote)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(receipts.len(), 1);

        let view = store.ledger_view(election.id).await.unwrap().unwrap();
        assert_eq!(view.ballots.len(), 1);
        assert_eq!(view.rights.iter().filter(|r| r.has_voted).count(), 1);
        assert_eq!(view.rights[0].vote_hash, Some(receipts[0].clone()));
        assert_eq!(
            Coll::<Ballot>::from_db(&db)
                .count_documents(None, None)
                .await
                .unwrap(),
            1
        );
    }

    #[backend_test(mongodb)]
    async fn used_right_survives_regrant_and_revoke(store: MongoStore) {
        let (election, candidate, voter) = seed(&store).await;
        let (ballot, receipt) = ballot_for(&election, &candidate, &voter);
        store
            .commit_vote(voter.id, &ballot, &receipt, Utc::now())
            .await
            .unwrap();
        let right = store
            .voting_right(voter.id, election.id)
            .await
            .unwrap()
            .unwrap();

        let regranted = store
            .upsert_voting_right(&voter, election.id, true, Utc::now())
            .await
            .unwrap();
        assert_eq!(regranted, right);
        assert!(store
            .upsert_voting_right(&voter, election.id, false, Utc::now())
            .await
            .is_err());
        assert!(store.delete_voting_right(right.id).await.is_err());
    }
}
