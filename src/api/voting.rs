use log::debug;
use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::ledger::VoteLedger;
use crate::logging::RequestId;
use crate::model::{
    api::{auth::AuthToken, CastVoteRequest, EligibilityResponse, ReceiptResponse},
    db::Voter,
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![eligibility, cast_vote, receipt]
}

#[get("/voter/elections/<election_id>/eligibility")]
async fn eligibility(
    token: AuthToken<Voter>,
    election_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<EligibilityResponse>> {
    let eligibility = ledger.check_eligibility(token.id(), election_id).await?;
    Ok(Json(eligibility.into()))
}

#[post("/voter/elections/<election_id>/vote", data = "<vote>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    election_id: Id,
    vote: Json<CastVoteRequest>,
    ledger: &State<VoteLedger>,
    request_id: RequestId,
) -> Result<Json<ReceiptResponse>> {
    let receipt = ledger
        .cast_vote(token.id(), election_id, vote.candidate_id)
        .await
        .map_err(|e| {
            debug!("Vote in request {request_id} rejected: {}", e.code());
            e
        })?;
    Ok(Json(ReceiptResponse { receipt }))
}

#[get("/voter/elections/<election_id>/receipt")]
async fn receipt(
    token: AuthToken<Voter>,
    election_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<ReceiptResponse>> {
    let receipt = ledger
        .receipt(token.id(), election_id)
        .await?
        .ok_or_else(|| Error::not_found("Receipt"))?;
    Ok(Json(ReceiptResponse { receipt }))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client, serde::json::json};

    use super::*;
    use crate::api::testing::{
        admin_auth, expect_code, json, open_election, registered_voter, voter_auth,
    };
    use crate::ledger::{SharedStore, VoteStore};
    use crate::model::common::{Demographics, Receipt};

    #[backend_test]
    async fn vote_returns_a_receipt(client: Client, store: SharedStore) {
        let (election, alice, _) = open_election(&store).await;
        let voter = registered_voter(&store, &election).await;

        let response = client
            .post(uri!(cast_vote(election.id)))
            .header(voter_auth(&voter))
            .json(&json!({ "candidateId": alice.id.to_string() }))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let cast: ReceiptResponse = json(response).await;
        assert_eq!(cast.receipt.as_str().len(), Receipt::LEN);

        let response = client
            .get(uri!(receipt(election.id)))
            .header(voter_auth(&voter))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let stored: ReceiptResponse = json(response).await;
        assert_eq!(stored, cast);
    }

    #[backend_test]
    async fn second_vote_conflicts(client: Client, store: SharedStore) {
        let (election, alice, bob) = open_election(&store).await;
        let voter = registered_voter(&store, &election).await;

        for (candidate, expected) in [(alice.id, Status::Ok), (bob.id, Status::Conflict)] {
            let response = client
                .post(uri!(cast_vote(election.id)))
                .header(voter_auth(&voter))
                .json(&json!({ "candidateId": candidate.to_string() }))
                .dispatch()
                .await;
            if expected == Status::Ok {
                assert_eq!(response.status(), expected);
            } else {
                expect_code(response, expected, "DUPLICATE_VOTE").await;
            }
        }

        let view = store.ledger_view(election.id).await.unwrap().unwrap();
        assert_eq!(view.ballots.len(), 1);
    }

    #[backend_test]
    async fn rejections_carry_their_reason(client: Client, store: SharedStore) {
        let (election, _, _) = open_election(&store).await;
        let voter = registered_voter(&store, &election).await;

        let response = client
            .post(uri!(cast_vote(election.id)))
            .header(voter_auth(&voter))
            .json(&json!({ "candidateId": Id::new().to_string() }))
            .dispatch()
            .await;
        expect_code(response, Status::BadRequest, "INVALID_CANDIDATE").await;

        let stranger = Voter::example(Demographics::science());
        store.insert_voter(&stranger).await.unwrap();
        let response = client
            .get(uri!(eligibility(election.id)))
            .header(voter_auth(&stranger))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let answer: EligibilityResponse = json(response).await;
        assert!(!answer.eligible);
        assert_eq!(answer.reason.map(|r| r.code()), Some("NOT_REGISTERED"));

        let response = client
            .get(uri!(receipt(election.id)))
            .header(voter_auth(&voter))
            .dispatch()
            .await;
        expect_code(response, Status::NotFound, "NOT_FOUND").await;
    }

    #[backend_test]
    async fn voter_routes_need_a_voter_token(client: Client, store: SharedStore) {
        let (election, alice, _) = open_election(&store).await;
        let body = json!({ "candidateId": alice.id.to_string() });

        let response = client
            .post(uri!(cast_vote(election.id)))
            .json(&body)
            .dispatch()
            .await;
        expect_code(response, Status::Unauthorized, "UNAUTHORIZED").await;

        let response = client
            .post(uri!(cast_vote(election.id)))
            .header(admin_auth())
            .json(&body)
            .dispatch()
            .await;
        expect_code(response, Status::Forbidden, "FORBIDDEN").await;

        let view = store.ledger_view(election.id).await.unwrap().unwrap();
        assert!(view.ballots.is_empty());
    }
}
