// SRA Leaderboard - Web Server
// Serves the leaderboard service contract on top of the SQLite store:
//   GET  /api/health
//   GET  /api/leaderboard/get/:track/:condition?season=N
//   POST /api/leaderboard/update   (Authorization: Bearer <token>)

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use sra_leaderboard::{
    Condition, Config, LeaderboardError, LeaderboardKey, LeaderboardResponse, LeaderboardStore,
    PublishDocument, SqliteStore, Track,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
    /// Bearer token required by the update endpoint; `None` disables updates
    token: Option<String>,
    /// Season used when a request does not name one
    current_season: u32,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

#[derive(Debug, Deserialize)]
struct SeasonParam {
    season: Option<u32>,
}

#[derive(Serialize)]
struct UpdateAck {
    leaderboard: String,
    drivers: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/leaderboard/get/:track/:condition - One leaderboard, ranked
async fn get_leaderboard(
    State(state): State<AppState>,
    Path((track, condition)): Path<(String, String)>,
    Query(params): Query<SeasonParam>,
) -> Response {
    let (Some(track), Ok(condition)) = (Track::from_key(&track), condition.parse::<Condition>()) else {
        return (StatusCode::NOT_FOUND, Json(LeaderboardResponse::does_not_exist())).into_response();
    };
    let key = LeaderboardKey {
        track,
        condition,
        season: params.season.unwrap_or(state.current_season),
    };

    match state.store.load(&key) {
        Ok(board) => (StatusCode::OK, Json(LeaderboardResponse::from_state(&board))).into_response(),
        Err(LeaderboardError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(LeaderboardResponse::does_not_exist())).into_response()
        }
        Err(e) => {
            error!("Error loading {}: {}", key, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /api/leaderboard/update - Replace one leaderboard wholesale
async fn update_leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(document): Json<PublishDocument>,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return failure(StatusCode::FORBIDDEN, "updates are disabled on this server");
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        warn!("Rejected update for {}: bad or missing token", document.track.name);
        return failure(StatusCode::UNAUTHORIZED, "invalid token");
    }

    let key = match document.key(state.current_season) {
        Ok(key) => key,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let mut board = match document.into_state(key) {
        Ok(board) => board,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let folded = board.fold_duplicates();
    if folded > 0 {
        warn!("Update for {} repeated {} driver/car rows; kept the fastest", key, folded);
    }
    let drivers = board.entries.len();
    board.last_updated = Some(Utc::now());

    match state.store.save(&board) {
        Ok(()) => {
            info!("Updated {} ({} drivers)", key, drivers);
            let ack = UpdateAck {
                leaderboard: key.to_string(),
                drivers,
            };
            (StatusCode::OK, Json(ApiResponse::ok(ack))).into_response()
        }
        Err(e) => {
            error!("Error saving {}: {}", key, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/leaderboard/get/:track/:condition", get(get_leaderboard))
        .route("/leaderboard/update", post(update_leaderboard))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🌐 SRA Leaderboard - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("SRA_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| Config::default_path());
    let config = match Config::load_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let store = SqliteStore::open(&config.sqlite_path)
        .map(|s| s.with_actor("sra-leaderboard-server"))
        .expect("Failed to open database");
    println!("✓ Database opened: {:?}", config.sqlite_path);

    let Some(current_season) = config.calendar().current().map(|s| s.number) else {
        eprintln!("❌ No seasons configured in {}", config_path.display());
        std::process::exit(1);
    };
    if config.api_token.is_none() {
        println!("⚠️  No API token configured: updates are disabled");
    }

    let state = AppState {
        store: Arc::new(store),
        token: config.api_token.clone(),
        current_season,
    };

    let addr = std::env::var("SRA_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/leaderboard/get/<track>/<condition>", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .expect("Failed to start server");
}
