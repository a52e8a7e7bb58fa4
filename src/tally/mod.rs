//! Counting, caching and publishing election results.

mod cache;
mod publisher;

pub use cache::ResultCache;
pub use publisher::{TallyPublisherFairing, TallyPublishers};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use thiserror::Error;

use crate::error::{Result, VoteError};
use crate::ledger::{LedgerView, VoteStore};
use crate::model::{
    api::{
        CandidateResult, ElectionSummary, GroupParticipation, Participation, TallySnapshot,
        TimelinePoint,
    },
    common::Demographics,
    db::VotingRight,
    mongodb::Id,
};

/// The ledger contradicts itself. Results are withheld rather than published
/// wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyDefect {
    #[error("Ballot {ballot_id} in election {election_id} names candidate {candidate_id}, who is not standing")]
    UnknownCandidate {
        election_id: Id,
        ballot_id: Id,
        candidate_id: Id,
    },
    #[error("Election {election_id} has {ballots} ballots but {voted} used voting rights")]
    ParticipationMismatch {
        election_id: Id,
        ballots: u64,
        voted: u64,
    },
}

/// Count a ledger view. Pure: the same view and time give the same snapshot.
///
/// Candidates are reported in registration order. The winner has the most
/// votes, the earliest registered candidate winning a tie; there is none
/// until a ballot is cast.
pub fn compute(view: &LedgerView, now: DateTime<Utc>) -> Result<TallySnapshot, TallyDefect> {
    let election_id = view.election.id;
    let total_ballots = view.ballots.len() as u64;

    let mut counts: HashMap<Id, u64> = view.candidates.iter().map(|c| (c.id, 0)).collect();
    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for ballot in &view.ballots {
        let Some(count) = counts.get_mut(&ballot.candidate_id) else {
            return Err(TallyDefect::UnknownCandidate {
                election_id,
                ballot_id: ballot.id,
                candidate_id: ballot.candidate_id,
            });
        };
        *count += 1;
        *per_day.entry(ballot.cast_at.date_naive()).or_default() += 1;
    }

    let voted = view.rights.iter().filter(|r| r.has_voted).count() as u64;
    if voted != total_ballots {
        return Err(TallyDefect::ParticipationMismatch {
            election_id,
            ballots: total_ballots,
            voted,
        });
    }

    let mut ordered: Vec<_> = view.candidates.iter().collect();
    ordered.sort_by_key(|c| (c.registered_at, c.id));
    let candidates: Vec<_> = ordered
        .into_iter()
        .map(|c| {
            let vote_count = counts.get(&c.id).copied().unwrap_or_default();
            CandidateResult {
                id: c.id,
                name: c.name.clone(),
                vote_count,
                percentage: percentage(vote_count, total_ballots),
            }
        })
        .collect();

    // Strictly greater, so the earliest registered keeps a tie.
    let winner = candidates
        .iter()
        .filter(|_| total_ballots > 0)
        .fold(None::<&CandidateResult>, |best, c| match best {
            Some(best) if best.vote_count >= c.vote_count => Some(best),
            _ => Some(c),
        })
        .cloned();

    let total_voters = view.rights.len() as u64;
    let participation = Participation {
        voted,
        not_voted: total_voters - voted,
        total_voters,
        percentage: percentage(voted, total_voters),
    };

    Ok(TallySnapshot {
        election: ElectionSummary::new(&view.election, now),
        candidates,
        winner,
        total_ballots,
        participation,
        participation_by_faculty: breakdown(&view.rights, |d| d.faculty.clone()),
        participation_by_major: breakdown(&view.rights, |d| d.major.clone()),
        participation_by_cohort: breakdown(&view.rights, |d| d.cohort.to_string()),
        timeline: per_day
            .into_iter()
            .map(|(date, count)| TimelinePoint { date, count })
            .collect(),
        computed_at: now,
    })
}

/// `part / whole` as a percentage, 0 for an empty whole.
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Turnout per group, sorted by group name.
fn breakdown(
    rights: &[VotingRight],
    group_of: impl Fn(&Demographics) -> String,
) -> Vec<GroupParticipation> {
    let mut groups: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for right in rights {
        let (voted, eligible) = groups.entry(group_of(&right.demographics)).or_default();
        if right.has_voted {
            *voted += 1;
        }
        if right.is_eligible {
            *eligible += 1;
        }
    }
    groups
        .into_iter()
        .map(|(group, (voted, eligible))| GroupParticipation {
            group,
            voted,
            eligible,
            percentage: percentage(voted, eligible),
        })
        .collect()
}

/// Computes snapshots from the live ledger.
#[derive(Clone)]
pub struct TallyEngine {
    store: Arc<dyn VoteStore>,
}

impl TallyEngine {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    pub async fn compute_tally(&self, election_id: Id) -> Result<TallySnapshot> {
        let view = self
            .store
            .ledger_view(election_id)
            .await?
            .ok_or(VoteError::InvalidElection)?;
        compute(&view, Utc::now()).map_err(|defect| {
            error!("Tally failed: {defect}");
            defect.into()
        })
    }
}
