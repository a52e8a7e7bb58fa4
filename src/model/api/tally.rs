use chrono::{serde::ts_milliseconds, DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    common::{ElectionStatus, Receipt},
    db::Election,
    mongodb::{id_as_hex, Id},
};

/// Results of one election, derived entirely from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySnapshot {
    pub election: ElectionSummary,
    /// In candidate registration order.
    pub candidates: Vec<CandidateResult>,
    pub winner: Option<CandidateResult>,
    pub total_ballots: u64,
    pub participation: Participation,
    pub participation_by_faculty: Vec<GroupParticipation>,
    pub participation_by_major: Vec<GroupParticipation>,
    pub participation_by_cohort: Vec<GroupParticipation>,
    pub timeline: Vec<TimelinePoint>,
    #[serde(with = "ts_milliseconds")]
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSummary {
    #[serde(with = "id_as_hex")]
    pub id: Id,
    pub title: String,
    #[serde(with = "ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    pub status: ElectionStatus,
}

impl ElectionSummary {
    pub fn new(election: &Election, now: DateTime<Utc>) -> Self {
        Self {
            id: election.id,
            title: election.title.clone(),
            start_time: election.start_time,
            end_time: election.end_time,
            status: election.status_at(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    #[serde(with = "id_as_hex")]
    pub id: Id,
    pub name: String,
    pub vote_count: u64,
    /// Share of all ballots, 0 to 100.
    pub percentage: f64,
}

/// Turnout over all voting rights of the election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub voted: u64,
    pub not_voted: u64,
    pub total_voters: u64,
    pub percentage: f64,
}

/// Turnout within one faculty, major or cohort, by the demographics frozen on
/// each voting right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipation {
    pub group: String,
    pub voted: u64,
    pub eligible: u64,
    /// `voted / eligible`, 0 to 100; 0 when nobody is eligible.
    pub percentage: f64,
}

/// Ballots cast on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub count: u64,
}

/// Everything a third party needs to check published results: the snapshot
/// and every ballot's receipt, sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDump {
    pub snapshot: TallySnapshot,
    pub receipts: Vec<Receipt>,
}

/// Ways a results dump can contradict itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DumpError {
    #[error("Candidate votes add up to {counted}, but {total} ballots are reported")]
    CandidateCounts { counted: u64, total: u64 },
    #[error("{total} ballots are reported, but there are {receipts} receipts")]
    ReceiptCount { total: u64, receipts: u64 },
    #[error("Receipt {0} is listed more than once")]
    DuplicateReceipt(Receipt),
    #[error("{voted} voters took part, but {total} ballots are reported")]
    Turnout { voted: u64, total: u64 },
    #[error("{voted} voted and {not_voted} did not, but there are {total_voters} voters")]
    VoterTotals {
        voted: u64,
        not_voted: u64,
        total_voters: u64,
    },
    #[error("The share of {subject} is given as {given}%, but is {expected}%")]
    Percentage {
        subject: String,
        given: f64,
        expected: f64,
    },
    #[error("The timeline counts {counted} ballots, but {total} are reported")]
    Timeline { counted: u64, total: u64 },
    #[error("The reported winner is {given:?}, but should be {expected:?}")]
    Winner {
        given: Option<String>,
        expected: Option<String>,
    },
}

/// Tolerance when comparing recomputed percentages.
const PERCENTAGE_EPSILON: f64 = 1e-6;

impl ResultsDump {
    /// Check the dump is internally consistent. Needs nothing but the dump,
    /// so anyone holding one can run it.
    pub fn verify(&self) -> Result<(), DumpError> {
        let snapshot = &self.snapshot;
        let total = snapshot.total_ballots;

        let counted = snapshot.candidates.iter().map(|c| c.vote_count).sum();
        if counted != total {
            return Err(DumpError::CandidateCounts { counted, total });
        }
        let receipts = self.receipts.len() as u64;
        if receipts != total {
            return Err(DumpError::ReceiptCount { total, receipts });
        }
        let mut sorted: Vec<&Receipt> = self.receipts.iter().collect();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(DumpError::DuplicateReceipt(pair[0].clone()));
        }

        let p = &snapshot.participation;
        if p.voted != total {
            return Err(DumpError::Turnout {
                voted: p.voted,
                total,
            });
        }
        if p.voted.checked_add(p.not_voted) != Some(p.total_voters) {
            return Err(DumpError::VoterTotals {
                voted: p.voted,
                not_voted: p.not_voted,
                total_voters: p.total_voters,
            });
        }
        check_percentage("turnout", p.percentage, p.voted, p.total_voters)?;
        for c in &snapshot.candidates {
            check_percentage(&c.name, c.percentage, c.vote_count, total)?;
        }

        let counted = snapshot.timeline.iter().map(|point| point.count).sum();
        if counted != total {
            return Err(DumpError::Timeline { counted, total });
        }

        // First of the highest counts, in registration order.
        let expected = snapshot
            .candidates
            .iter()
            .filter(|_| total > 0)
            .fold(None::<&CandidateResult>, |best, c| match best {
                Some(best) if best.vote_count >= c.vote_count => Some(best),
                _ => Some(c),
            });
        if snapshot.winner.as_ref().map(|w| w.id) != expected.map(|w| w.id) {
            return Err(DumpError::Winner {
                given: snapshot.winner.as_ref().map(|w| w.name.clone()),
                expected: expected.map(|w| w.name.clone()),
            });
        }

        Ok(())
    }

    pub fn contains(&self, receipt: &Receipt) -> bool {
        self.receipts.contains(receipt)
    }
}

fn check_percentage(subject: &str, given: f64, part: u64, whole: u64) -> Result<(), DumpError> {
    let expected = if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    };
    if (given - expected).abs() > PERCENTAGE_EPSILON {
        return Err(DumpError::Percentage {
            subject: subject.to_string(),
            given,
            expected,
        });
    }
    Ok(())
}
