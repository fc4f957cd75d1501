//! JSON-over-HTTP surface for the coordinator.

use crate::coordinator::{Coordinator, NewSession, SessionOf};
use crate::error::SessionError;
use crate::model::{Baseline, PlayerId, RequestKind, Session};
use crate::pipeline::MoveOutcome;
use crate::requests::RequestOutcome;
use crate::rules::Rules;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, instrument};

/// A session plus its live clocks.
#[derive(Debug, Serialize)]
pub struct SessionView<B, A> {
    /// The stored session.
    #[serde(flatten)]
    pub session: Session<B, A>,
    /// Remaining time per participant right now, for timed sessions.
    pub clocks_ms: BTreeMap<PlayerId, i64>,
}

impl<B, A> SessionView<B, A> {
    fn new(session: Session<B, A>, now: chrono::DateTime<chrono::Utc>) -> Self {
        let clocks_ms = session
            .participants()
            .iter()
            .filter_map(|p| {
                session
                    .clock_remaining_ms(&p.id, now)
                    .map(|ms| (p.id.clone(), ms.max(0)))
            })
            .collect();
        Self { session, clocks_ms }
    }
}

/// Response to a move submission.
#[derive(Debug, Serialize)]
pub struct MoveResponse<B, A> {
    /// `applied` or `expired`.
    pub outcome: &'static str,
    /// The session after the call.
    pub session: SessionView<B, A>,
}

/// Response to a request call.
#[derive(Debug, Serialize)]
pub struct RequestResponse<B, A> {
    /// `pending`, `approved`, `declined` or `cancelled`.
    pub resolution: &'static str,
    /// The session after the call.
    pub session: SessionView<B, A>,
}

/// Identifies the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerBody {
    /// The acting participant.
    pub player: PlayerId,
}

/// A move submission.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveBody<A> {
    /// The mover.
    pub player: PlayerId,
    /// Engine-specific action.
    pub action: A,
    /// Turn the client computed the move for.
    #[serde(default)]
    pub baseline: Option<Baseline>,
}

/// An undo or reset proposal.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposeBody {
    /// The requester.
    pub player: PlayerId,
    /// What is proposed.
    pub request: RequestKind,
}

/// An answer to the open request.
#[derive(Debug, Clone, Deserialize)]
pub struct RespondBody {
    /// The responder.
    pub player: PlayerId,
    /// Approve or decline.
    pub approve: bool,
}

/// A [`SessionError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
            SessionError::Conflict { .. } => StatusCode::CONFLICT,
            SessionError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, %status, "Request rejected");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;
type View<R> = SessionView<<R as Rules>::Board, <R as Rules>::Action>;

fn view<R: Rules>(coordinator: &Coordinator<R>, session: SessionOf<R>) -> View<R> {
    SessionView::new(session, coordinator.now())
}

/// Builds the router.
pub fn router<R: Rules>(coordinator: Coordinator<R>) -> Router {
    Router::new()
        .route(
            "/sessions",
            post(create_session::<R>).get(list_sessions::<R>),
        )
        .route("/sessions/{id}", get(get_session::<R>))
        .route("/sessions/{id}/accept", post(accept::<R>))
        .route("/sessions/{id}/decline", post(decline::<R>))
        .route("/sessions/{id}/resign", post(resign::<R>))
        .route("/sessions/{id}/poke", post(poke::<R>))
        .route("/sessions/{id}/moves", post(apply_move::<R>))
        .route("/sessions/{id}/requests", post(propose::<R>))
        .route("/sessions/{id}/requests/respond", post(respond::<R>))
        .with_state(coordinator)
}

#[instrument(skip_all)]
async fn create_session<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Json(body): Json<NewSession>,
) -> Result<(StatusCode, Json<View<R>>), ApiError> {
    let session = coordinator.create_session(body)?;
    Ok((StatusCode::CREATED, Json(view(&coordinator, session))))
}

#[instrument(skip_all)]
async fn list_sessions<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
) -> ApiResult<Vec<View<R>>> {
    let sessions = coordinator.list_sessions()?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| view(&coordinator, s))
            .collect(),
    ))
}

#[instrument(skip(coordinator))]
async fn get_session<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
) -> ApiResult<View<R>> {
    let session = coordinator.session(&id)?;
    Ok(Json(view(&coordinator, session)))
}

#[instrument(skip(coordinator))]
async fn accept<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<PlayerBody>,
) -> ApiResult<View<R>> {
    let session = coordinator.accept(&id, &body.player)?;
    Ok(Json(view(&coordinator, session)))
}

#[instrument(skip(coordinator))]
async fn decline<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<PlayerBody>,
) -> ApiResult<View<R>> {
    let session = coordinator.decline(&id, &body.player)?;
    Ok(Json(view(&coordinator, session)))
}

#[instrument(skip(coordinator))]
async fn resign<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<PlayerBody>,
) -> ApiResult<View<R>> {
    let session = coordinator.resign(&id, &body.player)?;
    Ok(Json(view(&coordinator, session)))
}

#[instrument(skip(coordinator))]
async fn poke<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
) -> ApiResult<View<R>> {
    let session = coordinator.poke(&id)?;
    Ok(Json(view(&coordinator, session)))
}

#[instrument(skip(coordinator, body), fields(player = %body.player))]
async fn apply_move<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<MoveBody<R::Action>>,
) -> ApiResult<MoveResponse<R::Board, R::Action>> {
    let outcome = coordinator.apply_move(&id, &body.player, body.action, body.baseline.as_ref())?;
    let (label, session) = match outcome {
        MoveOutcome::Applied(session) => ("applied", session),
        MoveOutcome::Expired(session) => ("expired", session),
    };
    Ok(Json(MoveResponse {
        outcome: label,
        session: view(&coordinator, session),
    }))
}

fn request_response<R: Rules>(
    coordinator: &Coordinator<R>,
    outcome: RequestOutcome<R::Board, R::Action>,
) -> RequestResponse<R::Board, R::Action> {
    let (label, session) = match outcome {
        RequestOutcome::Pending(s) => ("pending", s),
        RequestOutcome::Approved(s) => ("approved", s),
        RequestOutcome::Declined(s) => ("declined", s),
        RequestOutcome::Cancelled(s) => ("cancelled", s),
    };
    RequestResponse {
        resolution: label,
        session: view(coordinator, session),
    }
}

#[instrument(skip(coordinator))]
async fn propose<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<ProposeBody>,
) -> ApiResult<RequestResponse<R::Board, R::Action>> {
    let outcome = coordinator.propose(&id, &body.player, body.request)?;
    Ok(Json(request_response(&coordinator, outcome)))
}

#[instrument(skip(coordinator))]
async fn respond<R: Rules>(
    State(coordinator): State<Coordinator<R>>,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> ApiResult<RequestResponse<R::Board, R::Action>> {
    let outcome = coordinator.respond(&id, &body.player, body.approve)?;
    Ok(Json(request_response(&coordinator, outcome)))
}
