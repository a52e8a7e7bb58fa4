use rocket::{serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

mod admin;
mod public;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(public::routes());
    routes.extend(voting::routes());
    routes
}

/// JSON bodies for failures that happen before a handler runs, such as a
/// rejected token or an unparseable path.
pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

#[catch(default)]
fn default_catcher(status: rocket::http::Status, _req: &Request) -> Json<ErrorBody> {
    let code = match status.code {
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        422 => "UNPROCESSABLE",
        code if code >= 500 => "INTERNAL_ERROR",
        _ => "BAD_REQUEST",
    };
    Json(ErrorBody {
        code: code.to_string(),
        message: status.reason_lossy().to_string(),
    })
}
