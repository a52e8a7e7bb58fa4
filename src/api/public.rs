use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::ledger::VoteLedger;
use crate::model::{
    api::{ReceiptCheck, ResultsDump, TallySnapshot},
    common::Receipt,
    mongodb::Id,
};
use crate::tally::ResultCache;

pub fn routes() -> Vec<Route> {
    routes![tally, check_receipt, results_dump]
}

#[get("/elections/<election_id>/tally")]
async fn tally(election_id: Id, cache: &State<ResultCache>) -> Result<Json<TallySnapshot>> {
    Ok(Json(cache.get_snapshot(election_id).await?))
}

/// Lets a voter confirm their ballot was counted without revealing its content.
#[get("/elections/<election_id>/receipts/<receipt>")]
async fn check_receipt(
    election_id: Id,
    receipt: Receipt,
    ledger: &State<VoteLedger>,
) -> Result<Json<ReceiptCheck>> {
    let recorded = ledger.verify_receipt(election_id, &receipt).await?;
    Ok(Json(ReceiptCheck { receipt, recorded }))
}

#[get("/elections/<election_id>/dump")]
async fn results_dump(election_id: Id, ledger: &State<VoteLedger>) -> Result<Json<ResultsDump>> {
    Ok(Json(ledger.results_dump(election_id).await?))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client};

    use super::*;
    use crate::api::testing::{expect_code, json, open_election, registered_voter};
    use crate::ledger::{SharedStore, VoteStore};

    async fn vote(client: &Client, election_id: Id, voter_id: Id, candidate_id: Id) -> Receipt {
        let ledger = client.rocket().state::<VoteLedger>().unwrap();
        ledger
            .cast_vote(voter_id, election_id, candidate_id)
            .await
            .unwrap()
    }

    #[backend_test]
    async fn tally_counts_every_vote(client: Client, store: SharedStore) {
        let (election, alice, bob) = open_election(&store).await;
        for candidate in [alice.id, bob.id, bob.id] {
            let voter = registered_voter(&store, &election).await;
            vote(&client, election.id, voter.id, candidate).await;
        }
        registered_voter(&store, &election).await;

        let response = client.get(uri!(tally(election.id))).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let snapshot: TallySnapshot = json(response).await;

        assert_eq!(snapshot.total_ballots, 3);
        assert_eq!(snapshot.winner.unwrap().id, bob.id);
        assert_eq!(snapshot.participation.voted, 3);
        assert_eq!(snapshot.participation.not_voted, 1);
        assert_eq!(snapshot.participation_by_faculty[0].group, "Engineering");
        assert_eq!(snapshot.timeline.iter().map(|p| p.count).sum::<u64>(), 3);
    }

    #[backend_test]
    async fn tally_json_uses_camel_case(client: Client, store: SharedStore) {
        let (election, _, _) = open_election(&store).await;

        let response = client.get(uri!(tally(election.id))).dispatch().await;
        let raw: rocket::serde::json::Value = json(response).await;
        assert_eq!(raw["totalBallots"], 0);
        assert_eq!(raw["winner"], rocket::serde::json::Value::Null);
        assert_eq!(raw["election"]["status"], "ongoing");
        assert_eq!(raw["candidates"][0]["voteCount"], 0);
        assert!(raw["participationByCohort"].is_array());
    }

    #[backend_test]
    async fn receipts_can_be_checked_publicly(client: Client, store: SharedStore) {
        let (election, alice, _) = open_election(&store).await;
        let voter = registered_voter(&store, &election).await;
        let receipt = vote(&client, election.id, voter.id, alice.id).await;

        let url = format!("/elections/{}/receipts/{}", election.id, receipt);
        let check: ReceiptCheck = json(client.get(url).dispatch().await).await;
        assert!(check.recorded);

        let unknown = "ab".repeat(32);
        let url = format!("/elections/{}/receipts/{}", election.id, unknown);
        let check: ReceiptCheck = json(client.get(url).dispatch().await).await;
        assert!(!check.recorded);

        let url = format!("/elections/{}/receipts/not-a-receipt", election.id);
        let response = client.get(url).dispatch().await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[backend_test]
    async fn dump_matches_tally(client: Client, store: SharedStore) {
        let (election, alice, _) = open_election(&store).await;
        let mut receipts = Vec::new();
        for _ in 0..2 {
            let voter = registered_voter(&store, &election).await;
            receipts.push(vote(&client, election.id, voter.id, alice.id).await);
        }
        receipts.sort();

        let response = client.get(uri!(results_dump(election.id))).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let dump: ResultsDump = json(response).await;
        assert_eq!(dump.receipts, receipts);
        assert_eq!(dump.snapshot.total_ballots, 2);
        assert_eq!(dump.snapshot.candidates[0].vote_count, 2);
    }

    #[backend_test]
    async fn unknown_election_is_not_found(client: Client) {
        let response = client.get(uri!(tally(Id::new()))).dispatch().await;
        expect_code(response, Status::NotFound, "INVALID_ELECTION").await;

        let response = client.get(uri!(results_dump(Id::new()))).dispatch().await;
        expect_code(response, Status::NotFound, "INVALID_ELECTION").await;
    }
}
