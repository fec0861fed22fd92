use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::ecosystem::{
    CreateEcosystemRequest, EcosystemOutcome, EcosystemService, UpdateEcosystemRequest,
};
use crate::error::{ExchangeError, Result};
use crate::model::{MembershipStatus, OfferingConfiguration, PolicyRule};
use crate::negotiation::{CreateExchangeRequest, NegotiationService};
use crate::ParticipantId;

#[derive(Clone)]
pub struct AppState {
    pub negotiations: NegotiationService,
    pub ecosystems: EcosystemService,
}

/// Caller identity, taken from the `x-participant-id` header. Upstream
/// authentication middleware is expected to have verified it.
pub struct Caller(pub ParticipantId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ExchangeError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let header = parts
            .headers
            .get("x-participant-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ExchangeError::InvalidOperation("missing x-participant-id header".to_string())
            })?;
        let id = header.parse().map_err(|_| {
            ExchangeError::InvalidOperation("invalid x-participant-id header".to_string())
        })?;
        Ok(Caller(id))
    }
}

#[derive(Deserialize)]
struct PoliciesBody {
    #[serde(default)]
    policies: Vec<PolicyRule>,
}

#[derive(Deserialize)]
struct SignatureBody {
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolesBody {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteBody {
    participant_id: ParticipantId,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Deserialize)]
struct OfferingsBody {
    #[serde(default)]
    offerings: Vec<OfferingConfiguration>,
}

#[derive(Deserialize)]
struct StatusFilter {
    status: Option<MembershipStatus>,
}

pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/negotiation", post(create_negotiation).get(list_negotiations))
        .route("/negotiation/:id", get(get_negotiation).put(authorize_negotiation))
        .route("/negotiation/:id/accept", put(accept_negotiation))
        .route("/negotiation/:id/negotiate", put(negotiate_policies))
        .route("/negotiation/:id/sign", put(sign_negotiation))
        .route("/ecosystems", post(create_ecosystem).get(list_my_ecosystems))
        .route("/ecosystems/invitations", get(list_my_invitations))
        .route(
            "/ecosystems/:id",
            get(get_ecosystem).put(update_ecosystem).delete(delete_ecosystem),
        )
        .route("/ecosystems/:id/contract", get(get_ecosystem_contract).post(create_ecosystem_contract))
        .route("/ecosystems/:id/requests", post(request_to_join).get(list_join_requests))
        .route("/ecosystems/:id/requests/:request_id/authorize", put(authorize_join_request))
        .route("/ecosystems/:id/requests/:request_id/reject", put(reject_join_request))
        .route("/ecosystems/:id/invites", post(invite_participant).get(list_pending_invitations))
        .route("/ecosystems/:id/invites/accept", post(accept_invitation))
        .route("/ecosystems/:id/invites/deny", post(deny_invitation))
        .route("/ecosystems/:id/offerings", put(configure_offerings))
        .route("/ecosystems/:id/signature/orchestrator", post(sign_as_orchestrator))
        .route("/ecosystems/:id/signature/participant", post(sign_as_participant));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_negotiation(
    State(state): State<AppState>,
    Json(request): Json<CreateExchangeRequest>,
) -> Result<Response> {
    let config = state.negotiations.create(request).await?;
    Ok((StatusCode::CREATED, Json(config)).into_response())
}

async fn list_negotiations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Response> {
    let configs = state.negotiations.list_for(caller).await?;
    Ok(Json(configs).into_response())
}

async fn get_negotiation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let config = state.negotiations.get(id).await?;
    Ok(Json(config).into_response())
}

async fn authorize_negotiation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<PoliciesBody>,
) -> Result<Response> {
    let config = state.negotiations.authorize(id, caller, body.policies).await?;
    Ok(Json(config).into_response())
}

async fn accept_negotiation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
) -> Result<Response> {
    let config = state.negotiations.accept(id, caller).await?;
    Ok(Json(config).into_response())
}

async fn negotiate_policies(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<PoliciesBody>,
) -> Result<Response> {
    let config = state.negotiations.negotiate(id, caller, body.policies).await?;
    Ok(Json(config).into_response())
}

async fn sign_negotiation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<SignatureBody>,
) -> Result<Response> {
    let config = state.negotiations.sign(id, caller, &body.signature).await?;
    Ok(Json(config).into_response())
}

/// Renders a committed-but-degraded outcome: the resource persisted, a
/// contract leg failed. The resource rides along in the error body so the
/// client does not have to re-fetch it.
fn render_outcome(outcome: EcosystemOutcome, success: StatusCode) -> Response {
    match outcome.contract_error {
        None => (success, Json(outcome.ecosystem)).into_response(),
        Some(error) => {
            let status = error.status_code();
            let body = json!({
                "ecosystem": outcome.ecosystem,
                "error": {
                    "code": status.as_u16(),
                    "errorMsg": error.error_msg(),
                    "message": error.to_string(),
                },
            });
            (status, Json(body)).into_response()
        }
    }
}

async fn create_ecosystem(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<CreateEcosystemRequest>,
) -> Result<Response> {
    let outcome = state.ecosystems.create(caller, request).await?;
    Ok(render_outcome(outcome, StatusCode::CREATED))
}

async fn list_my_ecosystems(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Response> {
    let ecosystems = state.ecosystems.list_for(caller).await?;
    Ok(Json(ecosystems).into_response())
}

async fn list_my_invitations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Response> {
    let ecosystems = state.ecosystems.invitations_for(caller).await?;
    Ok(Json(ecosystems).into_response())
}

async fn get_ecosystem(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    let ecosystem = state.ecosystems.get(id).await?;
    Ok(Json(ecosystem).into_response())
}

async fn update_ecosystem(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(request): Json<UpdateEcosystemRequest>,
) -> Result<Response> {
    let outcome = state.ecosystems.update(id, caller, request).await?;
    Ok(render_outcome(outcome, StatusCode::OK))
}

async fn delete_ecosystem(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
) -> Result<Response> {
    state.ecosystems.delete(id, caller).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn get_ecosystem_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let contract = state.ecosystems.get_contract(id).await?;
    Ok(Json(contract).into_response())
}

async fn create_ecosystem_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
) -> Result<Response> {
    let ecosystem = state.ecosystems.create_contract(id, caller).await?;
    Ok((StatusCode::CREATED, Json(ecosystem)).into_response())
}

async fn request_to_join(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<RolesBody>,
) -> Result<Response> {
    let entry = state.ecosystems.request_to_join(id, caller, body.roles).await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

async fn list_join_requests(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(filter): Query<StatusFilter>,
) -> Result<Response> {
    let requests = state.ecosystems.join_requests(id, filter.status).await?;
    Ok(Json(requests).into_response())
}

async fn authorize_join_request(
    State(state): State<AppState>,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
    Caller(caller): Caller,
) -> Result<Response> {
    let entry = state
        .ecosystems
        .authorize_join_request(id, caller, request_id)
        .await?;
    Ok(Json(entry).into_response())
}

async fn reject_join_request(
    State(state): State<AppState>,
    Path((id, request_id)): Path<(Uuid, Uuid)>,
    Caller(caller): Caller,
) -> Result<Response> {
    let entry = state
        .ecosystems
        .reject_join_request(id, caller, request_id)
        .await?;
    Ok(Json(entry).into_response())
}

async fn invite_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<InviteBody>,
) -> Result<Response> {
    let entry = state
        .ecosystems
        .invite(id, caller, body.participant_id, body.roles)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

async fn list_pending_invitations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let invitations = state.ecosystems.pending_invitations(id).await?;
    Ok(Json(invitations).into_response())
}

async fn accept_invitation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
) -> Result<Response> {
    let entry = state.ecosystems.accept_invitation(id, caller).await?;
    Ok(Json(entry).into_response())
}

async fn deny_invitation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
) -> Result<Response> {
    let entry = state.ecosystems.deny_invitation(id, caller).await?;
    Ok(Json(entry).into_response())
}

async fn configure_offerings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<OfferingsBody>,
) -> Result<Response> {
    let ecosystem = state
        .ecosystems
        .configure_offerings(id, caller, body.offerings)
        .await?;
    Ok(Json(ecosystem).into_response())
}

async fn sign_as_orchestrator(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<SignatureBody>,
) -> Result<Response> {
    let contract = state
        .ecosystems
        .sign_orchestrator(id, caller, &body.signature)
        .await?;
    Ok(Json(contract).into_response())
}

async fn sign_as_participant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Caller(caller): Caller,
    Json(body): Json<SignatureBody>,
) -> Result<Response> {
    let ecosystem = state
        .ecosystems
        .sign_participant(id, caller, &body.signature)
        .await?;
    Ok(Json(ecosystem).into_response())
}
