use axum::{
    extract::{Path, Query, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use packbattle_execution::{
    cache::BoxCacheSnapshot, metrics::EngineMetricsSnapshot, Backend, Engine,
};
use packbattle_types::api::{
    AccountResponse, AddBotsRequest, BattleListResponse, BattleResponse, BoxListResponse,
    CreateBattleRequest, GrantRequest, InventoryResponse, LeaveResponse, OpenPacksRequest,
    SellRequest,
};
use packbattle_types::pack::{BattleStatus, CatalogBox};
use packbattle_types::{Actor, EngineError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ApiError;
use crate::{HttpMetricsSnapshot, Server, ServerConfig};

const USER_HEADER: &str = "x-user-id";
const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const DEFAULT_ADMIN_USER: &str = "admin";

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct MetricsResponse {
    http: HttpMetricsSnapshot,
    engine: EngineMetricsSnapshot,
    box_cache: BoxCacheSnapshot,
}

#[derive(Deserialize)]
pub(super) struct ListBattlesQuery {
    status: Option<String>,
}

/// Runs an engine call on the blocking pool. State errors carry the battle
/// snapshot so the client can resync.
async fn run<T, F>(server: &Arc<Server>, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine<Backend>) -> Result<T, EngineError> + Send + 'static,
{
    let server = Arc::clone(server);
    tokio::task::spawn_blocking(move || {
        let engine = server.engine();
        op(engine).map_err(|err| {
            let state = engine.snapshot_for(&err);
            ApiError::Engine { err, state }
        })
    })
    .await
    .map_err(ApiError::internal)?
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn token_matches(headers: &HeaderMap, token_header: &str, token: &str) -> bool {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    bearer == Some(token) || header_value(headers, token_header) == Some(token)
}

/// No configured token blocks all admin access.
fn admin_auth_error(config: &ServerConfig, headers: &HeaderMap) -> Option<StatusCode> {
    match config.admin_token.as_deref() {
        Some(token) if !token.is_empty() && token_matches(headers, "x-admin-token", token) => None,
        _ => Some(StatusCode::UNAUTHORIZED),
    }
}

/// Metrics are open when neither a metrics nor an admin token is configured.
fn metrics_auth_error(config: &ServerConfig, headers: &HeaderMap) -> Option<StatusCode> {
    let metrics_token = config.metrics_token.as_deref().filter(|t| !t.is_empty());
    let admin_token = config.admin_token.as_deref().filter(|t| !t.is_empty());
    if metrics_token.is_none() && admin_token.is_none() {
        return None;
    }
    let metrics_ok =
        metrics_token.is_some_and(|token| token_matches(headers, "x-metrics-token", token));
    let admin_ok = admin_token.is_some_and(|token| token_matches(headers, "x-admin-token", token));
    if metrics_ok || admin_ok {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

fn actor(server: &Server, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let user_id = header_value(headers, USER_HEADER).ok_or(ApiError::Unauthenticated)?;
    Ok(Actor {
        user_id: user_id.to_string(),
        is_admin: admin_auth_error(server.config(), headers).is_none(),
    })
}

fn admin_actor(server: &Server, headers: &HeaderMap) -> Result<Actor, ApiError> {
    if admin_auth_error(server.config(), headers).is_some() {
        return Err(ApiError::Unauthorized);
    }
    let user_id = header_value(headers, USER_HEADER).unwrap_or(DEFAULT_ADMIN_USER);
    Ok(Actor::admin(user_id))
}

/// Account data is visible to its owner and to admins.
fn ensure_owner(actor: &Actor, user_id: &str) -> Result<(), ApiError> {
    if actor.is_admin || actor.user_id == user_id {
        return Ok(());
    }
    Err(ApiError::Engine {
        err: EngineError::NotAuthorized,
        state: None,
    })
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    header_value(headers, IDEMPOTENCY_HEADER).map(str::to_string)
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn config(AxumState(server): AxumState<Arc<Server>>) -> Response {
    Json(server.config().clone()).into_response()
}

pub(super) async fn metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(server.config(), &headers) {
        return status.into_response();
    }
    Json(MetricsResponse {
        http: server.http_metrics_snapshot(),
        engine: server.engine().metrics(),
        box_cache: server.engine().cache(),
    })
    .into_response()
}

pub(super) async fn open_packs(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<OpenPacksRequest>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let key = idempotency_key(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let response = run(&server, move |engine| {
        engine.open_packs(&actor, request.box_id, request.quantity, &key)
    })
    .await?;
    Ok(Json(response).into_response())
}

pub(super) async fn list_battles(
    AxumState(server): AxumState<Arc<Server>>,
    Query(query): Query<ListBattlesQuery>,
) -> Result<Response, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BattleStatus>)
        .transpose()
        .map_err(|err| ApiError::BadRequest(format!("invalid status: {err}")))?;
    let battles = run(&server, move |engine| engine.list_battles(status)).await?;
    Ok(Json(BattleListResponse { battles }).into_response())
}

pub(super) async fn create_battle(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<CreateBattleRequest>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let battle = run(&server, move |engine| engine.create_battle(&actor, request)).await?;
    Ok((StatusCode::CREATED, Json(BattleResponse { battle })).into_response())
}

pub(super) async fn join_battle(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let response = run(&server, move |engine| engine.join(&actor, battle_id)).await?;
    Ok(Json(response).into_response())
}

pub(super) async fn leave_battle(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let (battle, coins_refunded) =
        run(&server, move |engine| engine.leave(&actor, battle_id)).await?;
    Ok(Json(LeaveResponse {
        battle,
        coins_refunded,
    })
    .into_response())
}

async fn update_ready(
    headers: HeaderMap,
    server: Arc<Server>,
    battle_id: u64,
    is_ready: bool,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let response = run(&server, move |engine| {
        engine.set_ready(&actor, battle_id, is_ready)
    })
    .await?;
    Ok(Json(response).into_response())
}

pub(super) async fn set_ready(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    update_ready(headers, server, battle_id, true).await
}

pub(super) async fn clear_ready(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    update_ready(headers, server, battle_id, false).await
}

pub(super) async fn add_bots(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
    Json(request): Json<AddBotsRequest>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let battle = run(&server, move |engine| {
        engine.add_bots(&actor, battle_id, request.count)
    })
    .await?;
    Ok(Json(BattleResponse { battle }).into_response())
}

pub(super) async fn start_battle(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let response = run(&server, move |engine| engine.start(&actor, battle_id)).await?;
    Ok(Json(response).into_response())
}

pub(super) async fn cancel_battle(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let battle = run(&server, move |engine| engine.cancel(&actor, battle_id)).await?;
    Ok(Json(BattleResponse { battle }).into_response())
}

pub(super) async fn battle_status(
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let response = run(&server, move |engine| engine.status(battle_id)).await?;
    Ok(Json(response).into_response())
}

pub(super) async fn battle_replay(
    AxumState(server): AxumState<Arc<Server>>,
    Path(battle_id): Path<u64>,
) -> Result<Response, ApiError> {
    let response = run(&server, move |engine| engine.replay(battle_id)).await?;
    Ok(Json(response).into_response())
}

pub(super) async fn sell_card(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<SellRequest>,
) -> Result<Response, ApiError> {
    let actor = actor(&server, &headers)?;
    let key = idempotency_key(&headers);
    let response = run(&server, move |engine| {
        engine.sell(&actor, request.pull_id, key.as_deref())
    })
    .await?;
    Ok(Json(response).into_response())
}

pub(super) async fn list_boxes(
    AxumState(server): AxumState<Arc<Server>>,
) -> Result<Response, ApiError> {
    let boxes = run(&server, |engine| engine.list_boxes()).await?;
    Ok(Json(BoxListResponse { boxes }).into_response())
}

pub(super) async fn get_box(
    AxumState(server): AxumState<Arc<Server>>,
    Path(box_id): Path<u64>,
) -> Result<Response, ApiError> {
    let card_box = run(&server, move |engine| engine.get_box(box_id)).await?;
    Ok(Json(card_box).into_response())
}

pub(super) async fn publish_box(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(payload): Json<CatalogBox>,
) -> Result<Response, ApiError> {
    let actor = admin_actor(&server, &headers)?;
    let card_box = run(&server, move |engine| {
        let card_box = payload.normalize()?;
        engine.publish_box(&actor, card_box)
    })
    .await?;
    Ok(Json(card_box).into_response())
}

pub(super) async fn invalidate_box(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(box_id): Path<u64>,
) -> Result<Response, ApiError> {
    admin_actor(&server, &headers)?;
    server.engine().invalidate_box(box_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(super) async fn clear_box_cache(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Result<Response, ApiError> {
    admin_actor(&server, &headers)?;
    server.engine().clear_box_cache();
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(super) async fn get_account(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    ensure_owner(&actor(&server, &headers)?, &user_id)?;
    let lookup = user_id.clone();
    let balance = run(&server, move |engine| engine.balance(&lookup)).await?;
    Ok(Json(AccountResponse { user_id, balance }).into_response())
}

pub(super) async fn grant_coins(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(user_id): Path<String>,
    Json(request): Json<GrantRequest>,
) -> Result<Response, ApiError> {
    let actor = admin_actor(&server, &headers)?;
    let key = idempotency_key(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let target = user_id.clone();
    let balance = run(&server, move |engine| {
        engine.grant(&actor, &target, request.amount, &key)
    })
    .await?;
    Ok(Json(AccountResponse { user_id, balance }).into_response())
}

pub(super) async fn get_inventory(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    ensure_owner(&actor(&server, &headers)?, &user_id)?;
    let lookup = user_id.clone();
    let pulls = run(&server, move |engine| engine.inventory(&lookup)).await?;
    Ok(Json(InventoryResponse { user_id, pulls }).into_response())
}
