//! HTTP adapter: the JSON API and the static file service.
//!
//! Handlers are thin: they validate the request, take the single state
//! lock, call into the application and shape the response. Every API
//! response carries `Cache-Control: no-cache`; error bodies are always
//! `{"code", "message"}` with the contract's codes.

use crate::app::{Application, Listeners, SharedApp};
use crate::db::Database;
use crate::model::Map;
use crate::ticker::advance;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

const TOKEN_LEN: usize = 32;
const MAX_RECORD_ITEMS: i64 = 100;

/// Everything a handler can reach: the state lock, the listener registry
/// (for the manual tick) and the leaderboard store.
#[derive(Clone)]
pub struct ApiState {
    pub app: SharedApp,
    pub listeners: Arc<Listeners>,
    pub db: Database,
}

/// An API failure, rendered as `{"code", "message"}` with the right status
/// and an `Allow` header where the method was the problem.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    allow: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            allow: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "badRequest", message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalidArgument", message)
    }

    pub fn map_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "mapNotFound", "Map not found")
    }

    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalidToken",
            "Authorization header is missing or malformed",
        )
    }

    pub fn unknown_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unknownToken",
            "Player token has not been found",
        )
    }

    fn method_not_allowed(code: &'static str, allow: &'static str) -> Self {
        let mut error = Self::new(StatusCode::METHOD_NOT_ALLOWED, code, "Method not allowed");
        error.allow = Some(allow);
        error
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internalServerError",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "message": self.message }));
        let mut response = (self.status, body).into_response();
        if let Some(allow) = self.allow {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}

/// Builds the full router: API routes plus the static file service for
/// everything else. The tick endpoint only exists when no internal ticker
/// runs.
pub fn build_router(state: ApiState, www_root: PathBuf, enable_tick_endpoint: bool) -> Router {
    let mut api = Router::new()
        .route("/v1/maps", get(list_maps).fallback(read_only_endpoint))
        .route("/v1/maps/{id}", get(get_map).fallback(read_only_endpoint))
        .route("/v1/game/join", post(join_game).fallback(post_only_endpoint))
        .route(
            "/v1/game/players",
            get(list_players).fallback(game_read_method_not_allowed),
        )
        .route(
            "/v1/game/state",
            get(game_state).fallback(game_read_method_not_allowed),
        )
        .route(
            "/v1/game/player/action",
            post(player_action).fallback(post_only_endpoint),
        )
        .route(
            "/v1/game/records",
            get(get_records).fallback(read_only_endpoint),
        );
    if enable_tick_endpoint {
        api = api.route("/v1/game/tick", post(tick).fallback(post_only_endpoint));
    }
    let api = api
        .fallback(unknown_endpoint)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ));

    Router::new()
        .nest("/api", api)
        .fallback_service(ServeDir::new(www_root).append_index_html_on_directories(true))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = std::time::Instant::now();
    let response = next.run(request).await;
    debug!(
        "{method} {uri} -> {} ({} ms)",
        response.status(),
        started.elapsed().as_millis()
    );
    response
}

async fn unknown_endpoint() -> ApiError {
    ApiError::bad_request("Invalid endpoint")
}

async fn read_only_endpoint() -> ApiError {
    ApiError::method_not_allowed("methodNotAllowed", "GET, HEAD")
}

async fn game_read_method_not_allowed() -> ApiError {
    ApiError::method_not_allowed("invalidMethod", "GET, HEAD")
}

async fn post_only_endpoint() -> ApiError {
    ApiError::method_not_allowed("invalidMethod", "POST")
}

/// Pulls the player id out of `Authorization: Bearer <32 hex chars>`.
fn bearer_player_id(headers: &HeaderMap, app: &Application) -> Result<u64, ApiError> {
    let token = parse_bearer_token(headers)?;
    app.find_player_by_token(&token)
        .ok_or_else(ApiError::unknown_token)
}

fn parse_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::invalid_token)?;
    let token = value.strip_prefix("Bearer ").ok_or_else(ApiError::invalid_token)?;
    if token.len() != TOKEN_LEN || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::invalid_token());
    }
    Ok(token.to_string())
}

fn ensure_json_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some("application/json") {
        return Err(ApiError::invalid_argument("Invalid content type"));
    }
    Ok(())
}

async fn list_maps(State(state): State<ApiState>) -> Json<Value> {
    let app = state.app.lock().await;
    let maps: Vec<Value> = app
        .game()
        .maps()
        .iter()
        .map(|map| json!({ "id": map.id, "name": map.name }))
        .collect();
    Json(Value::Array(maps))
}

fn map_to_json(map: &Map) -> Value {
    let roads: Vec<Value> = map
        .roads()
        .iter()
        .map(|road| {
            let start = road.start();
            if road.is_horizontal() {
                json!({ "x0": start.x, "y0": start.y, "x1": road.end().x })
            } else {
                json!({ "x0": start.x, "y0": start.y, "y1": road.end().y })
            }
        })
        .collect();
    let buildings: Vec<Value> = map
        .buildings()
        .iter()
        .map(|building| {
            json!({
                "x": building.bounds.position.x,
                "y": building.bounds.position.y,
                "w": building.bounds.size.width,
                "h": building.bounds.size.height,
            })
        })
        .collect();
    let offices: Vec<Value> = map
        .offices()
        .iter()
        .map(|office| {
            json!({
                "id": office.id,
                "x": office.position.x,
                "y": office.position.y,
                "offsetX": office.offset.dx,
                "offsetY": office.offset.dy,
            })
        })
        .collect();

    json!({
        "id": map.id,
        "name": map.name,
        "roads": roads,
        "buildings": buildings,
        "offices": offices,
        "lootTypes": map.loot_types(),
    })
}

async fn get_map(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let app = state.app.lock().await;
    let map = app.game().find_map(&id).ok_or_else(ApiError::map_not_found)?;
    Ok(Json(map_to_json(map)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    user_name: String,
    map_id: String,
}

async fn join_game(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    ensure_json_content_type(&headers)?;
    let request: JoinRequest = serde_json::from_str(&body)
        .map_err(|_| ApiError::invalid_argument("Join game request parse error"))?;
    if request.user_name.is_empty() {
        return Err(ApiError::invalid_argument("Invalid name"));
    }

    let mut app = state.app.lock().await;
    if app.game().find_map(&request.map_id).is_none() {
        return Err(ApiError::map_not_found());
    }
    let (player_id, token) = app
        .join_game(&request.map_id, &request.user_name)
        .ok_or_else(ApiError::internal)?;

    Ok(Json(json!({ "authToken": token, "playerId": player_id })))
}

async fn list_players(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let app = state.app.lock().await;
    bearer_player_id(&headers, &app)?;

    let mut players = serde_json::Map::new();
    for (&id, player) in app.players().iter() {
        if let Some(dog) = app
            .game()
            .find_session(&player.map_id)
            .and_then(|session| session.dog(id))
        {
            players.insert(id.to_string(), json!({ "name": dog.name }));
        }
    }
    Ok(Json(Value::Object(players)))
}

async fn game_state(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let app = state.app.lock().await;
    let player_id = bearer_player_id(&headers, &app)?;

    let player = app.players().find(player_id).ok_or_else(ApiError::unknown_token)?;
    let session = app
        .game()
        .find_session(&player.map_id)
        .ok_or_else(ApiError::internal)?;

    let mut players = serde_json::Map::new();
    for (id, dog) in session.dogs() {
        let bag: Vec<Value> = dog
            .bag
            .iter()
            .map(|&(loot_id, loot_type)| json!({ "id": loot_id, "type": loot_type }))
            .collect();
        players.insert(
            id.to_string(),
            json!({
                "pos": [dog.pos.x, dog.pos.y],
                "speed": [dog.vel.x, dog.vel.y],
                "dir": dog.dir.as_str(),
                "bag": bag,
                "score": dog.score,
            }),
        );
    }

    let mut lost_objects = serde_json::Map::new();
    for (id, &(loot_type, pos)) in session.loot() {
        lost_objects.insert(
            id.to_string(),
            json!({ "type": loot_type, "pos": [pos.x, pos.y] }),
        );
    }

    Ok(Json(json!({ "players": players, "lostObjects": lost_objects })))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    #[serde(rename = "move")]
    move_command: String,
}

async fn player_action(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let mut app = state.app.lock().await;
    let player_id = bearer_player_id(&headers, &app)?;
    ensure_json_content_type(&headers)?;

    let request: ActionRequest = serde_json::from_str(&body)
        .map_err(|_| ApiError::invalid_argument("Failed to parse action"))?;
    if !matches!(request.move_command.as_str(), "L" | "R" | "U" | "D" | "") {
        return Err(ApiError::invalid_argument("Failed to parse action"));
    }

    if !app.set_player_action(player_id, &request.move_command) {
        return Err(ApiError::unknown_token());
    }
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickRequest {
    time_delta: u64,
}

async fn tick(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    ensure_json_content_type(&headers)?;
    let request: TickRequest = serde_json::from_str(&body)
        .map_err(|_| ApiError::invalid_argument("Failed to parse tick request JSON"))?;

    advance(
        &state.app,
        &state.listeners,
        Duration::from_millis(request.time_delta),
    )
    .await;
    Ok(Json(json!({})))
}

async fn get_records(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let start = match params.get("start") {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|&v| v >= 0)
            .ok_or_else(|| ApiError::bad_request("\"start\" out of range"))?,
        None => 0,
    };
    let max_items = match params.get("maxItems") {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|&v| v > 0 && v <= MAX_RECORD_ITEMS)
            .ok_or_else(|| ApiError::bad_request("\"maxItems\" out of range"))?,
        None => MAX_RECORD_ITEMS,
    };

    let mut uow = state.db.unit_of_work().await.map_err(|_| ApiError::internal())?;
    let retired = uow
        .fetch_retired_dogs(start, max_items)
        .await
        .map_err(|_| ApiError::internal())?;
    uow.commit().await.map_err(|_| ApiError::internal())?;

    let records: Vec<Value> = retired
        .into_iter()
        .map(|dog| {
            json!({
                "name": dog.name,
                "score": dog.score,
                "playTime": dog.play_time_ms as f64 / 1000.0,
            })
        })
        .collect();
    Ok(Json(Value::Array(records)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_accepts_exact_form() {
        let token = "0123456789abcdef0123456789abcdef";
        let headers = headers_with_auth(&format!("Bearer {token}"));
        assert_eq!(parse_bearer_token(&headers).unwrap(), token);
    }

    #[test]
    fn test_bearer_token_rejects_malformed_headers() {
        for value in [
            "0123456789abcdef0123456789abcdef",          // no scheme
            "Basic 0123456789abcdef0123456789abcdef",    // wrong scheme
            "Bearer 0123456789abcdef",                   // too short
            "Bearer 0123456789abcdef0123456789abcdefff", // too long
            "Bearer 0123456789abcdef0123456789abcdeg",   // not hex
            "Bearer",
        ] {
            let headers = headers_with_auth(value);
            assert!(parse_bearer_token(&headers).is_err(), "accepted {value:?}");
        }
        assert!(parse_bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_content_type_must_be_json_exactly() {
        let mut headers = HeaderMap::new();
        assert!(ensure_json_content_type(&headers).is_err());

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert!(ensure_json_content_type(&headers).is_ok());

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(ensure_json_content_type(&headers).is_err());
    }

    #[test]
    fn test_api_error_carries_allow_header() {
        let response = ApiError::method_not_allowed("invalidMethod", "POST").into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW),
            Some(&HeaderValue::from_static("POST"))
        );
    }

    #[test]
    fn test_api_error_shapes_body() {
        let error = ApiError::map_not_found();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.code, "mapNotFound");
    }
}
