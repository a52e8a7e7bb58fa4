use rocket::{http::Status, serde::json::Json, Route, State};

use crate::error::Result;
use crate::ledger::{LedgerAudit, VoteLedger};
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        GrantRequest, TallySnapshot, VotingRightDesc,
    },
    mongodb::Id,
};
use crate::tally::TallyPublishers;

pub fn routes() -> Vec<Route> {
    routes![grant_voting_right, revoke_voting_right, audit, publish]
}

#[post("/admin/elections/<election_id>/rights", data = "<grant>", format = "json")]
async fn grant_voting_right(
    _token: AuthToken<Admin>,
    election_id: Id,
    grant: Json<GrantRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<VotingRightDesc>> {
    let right = ledger
        .grant_voting_right(grant.voter_id, election_id, grant.is_eligible)
        .await?;
    Ok(Json(right))
}

#[delete("/admin/rights/<right_id>")]
async fn revoke_voting_right(
    _token: AuthToken<Admin>,
    right_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Status> {
    ledger.revoke_voting_right(right_id).await?;
    Ok(Status::NoContent)
}

#[get("/admin/elections/<election_id>/audit")]
async fn audit(
    _token: AuthToken<Admin>,
    election_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<LedgerAudit>> {
    Ok(Json(ledger.audit(election_id).await?))
}

/// Compute and publish final results now instead of waiting for the
/// scheduled publisher.
#[post("/admin/elections/<election_id>/publish")]
async fn publish(
    _token: AuthToken<Admin>,
    election_id: Id,
    publishers: &State<TallyPublishers>,
) -> Result<Json<TallySnapshot>> {
    Ok(Json(publishers.publish_now(election_id).await?))
}
