use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{Extensions, HeaderMap, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use super::db::DbHandle;
use super::models::*;
use crate::server::ApiError;

pub struct CatalogState {
    pub db: DbHandle,
    pub api_key: Option<String>,
    pub service_name: String,
    pub version: String,
}

pub type SharedCatalog = Arc<CatalogState>;

// ── Router ────────────────────────────────────────────────────────────

pub fn catalog_router(state: SharedCatalog) -> Router {
    let admin = Router::new()
        .route("/tools", get(admin_list_tools).post(create_tool))
        .route("/tools/{id}", axum::routing::put(update_tool).delete(delete_tool))
        .route("/stats", get(admin_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(root_health))
        .route("/api/health", get(api_health))
        .route("/api/tools", get(list_tools).post(create_tool))
        .route(
            "/api/tools/{id}",
            get(get_tool).put(update_tool).delete(delete_tool),
        )
        .route("/api/tools/{id}/use", axum::routing::post(record_usage))
        .route("/api/stats/tools", get(tool_stats))
        .route("/api/stats/tools/{id}", get(tool_usage_stats))
        .route("/api/stats/usage", get(usage_stats))
        .route("/api/stats/overview", get(overview_stats))
        .nest("/api/admin", admin)
        .with_state(state)
}

/// Admin routes need an `X-API-Key` header; when a key is configured it must match.
async fn require_api_key(
    State(state): State<SharedCatalog>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return Err(ApiError::Unauthorized("API key is required".into()));
    }
    if let Some(expected) = state.api_key.as_deref() {
        if provided != expected {
            tracing::warn!(path = %req.uri().path(), "rejected admin request with invalid API key");
            return Err(ApiError::Unauthorized("Invalid API key".into()));
        }
    }
    Ok(next.run(req).await)
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid tool ID '{}'", raw)))
}

fn tool_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("Tool {} not found", id))
}

/// Forwarded address if a proxy set one, else the peer address.
fn client_address(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match forwarded {
        Some(addr) => addr.to_string(),
        None => extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default(),
    }
}

// ── Handlers: health ──────────────────────────────────────────────────

async fn root_health(State(state): State<SharedCatalog>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.service_name,
        "version": state.version,
    }))
}

async fn api_health(State(state): State<SharedCatalog>) -> impl IntoResponse {
    Json(ApiResponse::ok(json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.version,
    })))
}

// ── Handlers: tools ───────────────────────────────────────────────────

async fn list_tools(
    State(state): State<SharedCatalog>,
    Query(filter): Query<ToolFilter>,
) -> Result<impl IntoResponse, ApiError> {
    list_with(&state, filter).await
}

async fn admin_list_tools(
    State(state): State<SharedCatalog>,
    Query(mut filter): Query<ToolFilter>,
) -> Result<impl IntoResponse, ApiError> {
    filter.include_inactive = true;
    list_with(&state, filter).await
}

async fn list_with(
    state: &SharedCatalog,
    filter: ToolFilter,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let tools = state.db.call(move |db| db.list_tools(&filter)).await?;
    Ok(Json(ApiResponse::ok(json!({
        "total": tools.len(),
        "tools": tools,
    }))))
}

async fn get_tool(
    State(state): State<SharedCatalog>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let tool = state
        .db
        .call(move |db| db.get_tool(id, false))
        .await?
        .ok_or_else(|| tool_not_found(id))?;
    Ok(Json(ApiResponse::ok(tool)))
}

async fn create_tool(
    State(state): State<SharedCatalog>,
    Json(req): Json<NewTool>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    let tool = state.db.call(move |db| db.create_tool(&req)).await?;
    tracing::info!(tool_id = tool.id, name = %tool.name, "tool created");
    Ok((
        axum::http::StatusCode::CREATED,
        Json(ApiResponse::with_message("Tool created successfully", tool)),
    ))
}

async fn update_tool(
    State(state): State<SharedCatalog>,
    Path(id): Path<String>,
    Json(req): Json<ToolUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if req.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".into()));
    }
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    let tool = state
        .db
        .call(move |db| db.update_tool(id, &req))
        .await?
        .ok_or_else(|| tool_not_found(id))?;
    Ok(Json(ApiResponse::with_message("Tool updated successfully", tool)))
}

async fn delete_tool(
    State(state): State<SharedCatalog>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    if !state.db.call(move |db| db.delete_tool(id)).await? {
        return Err(tool_not_found(id));
    }
    tracing::info!(tool_id = id, "tool deleted");
    Ok(Json(json!({"success": true, "message": "Tool deleted successfully"})))
}

async fn record_usage(
    State(state): State<SharedCatalog>,
    Path(id): Path<String>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let ip = client_address(&headers, &extensions);
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let usage = state
        .db
        .call(move |db| db.record_usage(id, &ip, &agent))
        .await?
        .ok_or_else(|| tool_not_found(id))?;
    Ok(Json(ApiResponse::with_message("Usage recorded successfully", usage)))
}

// ── Handlers: stats ───────────────────────────────────────────────────

async fn tool_stats(State(state): State<SharedCatalog>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.db.call(|db| db.tool_stats()).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

async fn usage_stats(
    State(state): State<SharedCatalog>,
    Query(query): Query<DaysQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days();
    let stats = state.db.call(move |db| db.usage_stats(days)).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

async fn tool_usage_stats(
    State(state): State<SharedCatalog>,
    Path(id): Path<String>,
    Query(query): Query<DaysQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let days = query.days();
    let stats = state
        .db
        .call(move |db| db.tool_usage_stats(id, days))
        .await?
        .ok_or_else(|| tool_not_found(id))?;
    Ok(Json(ApiResponse::ok(stats)))
}

async fn overview_stats(State(state): State<SharedCatalog>) -> Result<impl IntoResponse, ApiError> {
    let overview = state.db.call(|db| db.overview()).await?;
    Ok(Json(ApiResponse::ok(overview)))
}

async fn admin_stats(State(state): State<SharedCatalog>) -> Result<impl IntoResponse, ApiError> {
    let (tools, usage, overview) = state
        .db
        .call(|db| Ok((db.tool_stats()?, db.usage_stats(DEFAULT_STATS_DAYS)?, db.overview()?)))
        .await?;
    Ok(Json(ApiResponse::ok(json!({
        "tools": tools,
        "usage": usage,
        "overview": overview,
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::db::CatalogDb;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app(api_key: Option<&str>) -> Router {
        let state = Arc::new(CatalogState {
            db: DbHandle::new(CatalogDb::new_in_memory().unwrap()),
            api_key: api_key.map(String::from),
            service_name: "tion-catalog".into(),
            version: "0.1.0".into(),
        });
        catalog_router(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn send(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn create(app: &Router, body: serde_json::Value) -> i64 {
        let response = app
            .clone()
            .oneshot(send("POST", "/api/tools", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        body["data"]["id"].as_i64().unwrap()
    }

    // 1. Health endpoints
    #[tokio::test]
    async fn test_health_endpoints() {
        let app = test_app(None);
        let response = app.clone().oneshot(send("GET", "/health", None)).await.unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["status"], "ok");

        let response = app.oneshot(send("GET", "/api/health", None)).await.unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
    }

    // 2. Create, fetch, list
    #[tokio::test]
    async fn test_tool_crud_flow() {
        let app = test_app(None);
        let id = create(&app, json!({"name": "DCA", "category": "Calculators"})).await;

        let response = app
            .clone()
            .oneshot(send("GET", &format!("/api/tools/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["name"], "DCA");

        let response = app
            .clone()
            .oneshot(send("PUT", &format!("/api/tools/{}", id), Some(json!({"icon": "Chart"}))))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["icon"], "Chart");
        assert_eq!(body["message"], "Tool updated successfully");

        let response = app
            .clone()
            .oneshot(send("DELETE", &format!("/api/tools/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(send("GET", &format!("/api/tools/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 3. Query filters
    #[tokio::test]
    async fn test_list_with_category_and_search() {
        let app = test_app(None);
        create(&app, json!({"name": "DCA", "category": "Calculators"})).await;
        create(&app, json!({"name": "Validator", "category": "Security"})).await;

        let response = app
            .clone()
            .oneshot(send("GET", "/api/tools?category=Security", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["tools"][0]["name"], "Validator");

        let response = app
            .oneshot(send("GET", "/api/tools?q=dc", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total"], 1);
    }

    // 4. Validation
    #[tokio::test]
    async fn test_invalid_requests() {
        let app = test_app(None);
        let response = app
            .clone()
            .oneshot(send("POST", "/api/tools", Some(json!({"name": " "}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], false);

        let response = app
            .clone()
            .oneshot(send("GET", "/api/tools/abc", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let id = create(&app, json!({"name": "X"})).await;
        let response = app
            .oneshot(send("PUT", &format!("/api/tools/{}", id), Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // 5. Usage recording captures the caller
    #[tokio::test]
    async fn test_record_usage_and_stats() {
        let app = test_app(None);
        let id = create(&app, json!({"name": "Used"})).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/tools/{}/use", id))
                    .header("user-agent", "test-agent")
                    .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["ip_address"], "10.0.0.1");
        assert_eq!(body["data"]["user_agent"], "test-agent");

        let response = app
            .clone()
            .oneshot(send("GET", &format!("/api/stats/tools/{}?days=30", id), None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total_usage"], 1);
        assert_eq!(body["data"]["period_days"], 30);

        let response = app
            .clone()
            .oneshot(send("GET", "/api/stats/usage", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["period_days"], 7);
        assert_eq!(body["data"]["today_usage"], 1);

        let response = app
            .oneshot(send("POST", "/api/tools/999/use", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 6. Overview and tool stats
    #[tokio::test]
    async fn test_overview_and_tool_stats() {
        let app = test_app(None);
        create(&app, json!({"name": "A", "category": "Calculators"})).await;

        let response = app
            .clone()
            .oneshot(send("GET", "/api/stats/tools", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["categories"], json!(["Calculators"]));

        let response = app
            .oneshot(send("GET", "/api/stats/overview", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total_tools"], 1);
        assert!(body["data"]["last_updated"].is_string());
    }

    // 7. Admin routes require the API key
    #[tokio::test]
    async fn test_admin_requires_api_key() {
        let app = test_app(Some("secret"));
        let response = app
            .clone()
            .oneshot(send("GET", "/api/admin/tools", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "API key is required");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/stats")
                    .header("x-api-key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/stats")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["usage"]["period_days"], 7);
    }

    // 8. Admin listing includes inactive tools
    #[tokio::test]
    async fn test_admin_lists_inactive_tools() {
        let app = test_app(None);
        create(&app, json!({"name": "Off", "is_active": false})).await;

        let response = app
            .clone()
            .oneshot(send("GET", "/api/tools", None))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total"], 0);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/tools")
                    .header("x-api-key", "anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["data"]["total"], 1);
    }
}
