use anyhow::{Context, Result};
use std::{collections::BTreeMap, future::IntoFuture, path::Path as FsPath, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog_store::{CatalogStore, Page, PartView, SetDetail, SetSummary, ShapeDetail};
use crate::catalog_sync::{CatalogSync, SyncError};
use crate::image_pipeline::{ImageTaskStore, TaskStatus};
use crate::search::{SearchMode, SearchQuery};
use crate::user::{AuthTokenValue, UserManager};
use axum_extra::extract::cookie::{Cookie, SameSite};
use tower_http::services::ServeDir;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::metrics::{self, metrics_handler};
use super::session::{Session, COOKIE_SESSION_TOKEN_KEY};
use super::{log_requests, state::*, ServerConfig};

pub const INDEX_TITLE: &str = "Our Lego";
pub const MAX_SET_LEGO_ID_LEN: usize = 30;
pub const STATIC_URL_PREFIX: &str = "/static";

const FIELD_REQUIRED: &str = "This field is required.";

type FieldErrors = BTreeMap<&'static str, Vec<String>>;

#[derive(Serialize)]
struct FieldErrorsResponse {
    errors: FieldErrors,
}

fn unprocessable(errors: FieldErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(FieldErrorsResponse { errors }),
    )
        .into_response()
}

fn internal_error<E: std::fmt::Display>(context: &str, err: E) -> Response {
    error!("{}: {:#}", context, err);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

// =============================================================================
// Static image paths
// =============================================================================

/// Turns stored image paths into `/static` URLs, dropping those whose file is
/// missing from the static dir.
struct StaticImages<'a> {
    dir: &'a FsPath,
}

impl StaticImages<'_> {
    fn resolve(&self, image: &mut Option<String>) {
        *image = image.take().and_then(|rel_path| {
            if self.dir.join(&rel_path).is_file() {
                Some(format!("{}/{}", STATIC_URL_PREFIX, rel_path))
            } else {
                debug!("Static file missing: {}", rel_path);
                None
            }
        });
    }

    fn sets(&self, sets: &mut [SetSummary]) {
        for set in sets {
            self.resolve(&mut set.image);
        }
    }

    fn parts(&self, parts: &mut [PartView]) {
        for part in parts {
            self.resolve(&mut part.image);
        }
    }

    fn set_detail(&self, detail: &mut SetDetail) {
        self.resolve(&mut detail.image);
        for item in detail.items.iter_mut() {
            self.resolve(&mut item.part.image);
        }
    }

    fn shape_detail(&self, detail: &mut ShapeDetail) {
        for usage in detail.parts.iter_mut() {
            self.resolve(&mut usage.part.image);
        }
    }
}

fn static_images(config: &ServerConfig) -> StaticImages<'_> {
    StaticImages {
        dir: &config.static_dir,
    }
}

// =============================================================================
// Catalog pages
// =============================================================================

#[derive(Deserialize, Debug, Default)]
struct PageParams {
    page: Option<String>,
}

fn parse_page_number(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

#[derive(Serialize)]
struct IndexResponse {
    title: &'static str,
    sets: Vec<SetSummary>,
    page: usize,
}

async fn index(
    State(state): State<ServerState>,
    Query(params): Query<PageParams>,
) -> Response {
    let page = Page::new(
        parse_page_number(params.page.as_deref()),
        state.config.page_size,
    );
    match state.catalog_store.list_sets(page) {
        Ok(mut sets) => {
            static_images(&state.config).sets(&mut sets);
            Json(IndexResponse {
                title: INDEX_TITLE,
                sets,
                page: page.number,
            })
            .into_response()
        }
        Err(err) => internal_error("Failed to list sets", err),
    }
}

#[derive(Serialize)]
struct SetDetailResponse {
    title: String,
    #[serde(flatten)]
    set: SetDetail,
}

async fn get_set(State(state): State<ServerState>, Path(lego_id): Path<String>) -> Response {
    match state.catalog_store.get_set_detail(&lego_id) {
        Ok(Some(mut set)) => {
            static_images(&state.config).set_detail(&mut set);
            Json(SetDetailResponse {
                title: format!("Lego Set {} {}", set.lego_id, set.name),
                set,
            })
            .into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => internal_error("Failed to load set", err),
    }
}

#[derive(Serialize)]
struct ShapeDetailResponse {
    title: String,
    #[serde(flatten)]
    shape: ShapeDetail,
}

fn shape_detail_response(
    state: &ServerState,
    lego_id: &str,
    color_id: Option<i64>,
) -> Response {
    match state.catalog_store.get_shape_detail(lego_id, color_id) {
        Ok(Some(mut shape)) => {
            static_images(&state.config).shape_detail(&mut shape);
            Json(ShapeDetailResponse {
                title: format!("Lego Part {} {}", shape.lego_id, shape.name),
                shape,
            })
            .into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => internal_error("Failed to load part", err),
    }
}

async fn get_part(State(state): State<ServerState>, Path(lego_id): Path<String>) -> Response {
    shape_detail_response(&state, &lego_id, None)
}

async fn get_part_in_color(
    State(state): State<ServerState>,
    Path((lego_id, color_id)): Path<(String, i64)>,
) -> Response {
    shape_detail_response(&state, &lego_id, Some(color_id))
}

// =============================================================================
// Search
// =============================================================================

#[derive(Deserialize, Debug, Default)]
struct SearchParams {
    q: Option<String>,
    mode: Option<String>,
    page: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    title: String,
    q: String,
    mode: SearchMode,
    page: usize,
    sets: Vec<SetSummary>,
    parts: Vec<PartView>,
}

fn validate_search(params: &SearchParams) -> Result<SearchQuery, FieldErrors> {
    let mut errors = FieldErrors::new();

    let mode = match params.mode.as_deref().filter(|m| !m.is_empty()) {
        None => Some(SearchMode::default()),
        Some(raw) => match raw.parse::<SearchMode>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                errors.insert("mode", vec![err.to_string()]);
                None
            }
        },
    };

    let text = params.q.clone().unwrap_or_default();
    let query = match mode {
        Some(mode) => match SearchQuery::new(text, mode) {
            Ok(query) => Some(query),
            Err(err) => {
                errors.insert("q", vec![err.to_string()]);
                None
            }
        },
        None => {
            // Still report problems with the text alongside the bad mode.
            if let Err(err) = SearchQuery::new(text, SearchMode::default()) {
                errors.insert("q", vec![err.to_string()]);
            }
            None
        }
    };

    match query {
        Some(query) if errors.is_empty() => Ok(query),
        _ => Err(errors),
    }
}

async fn search(
    State(state): State<ServerState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = match validate_search(&params) {
        Ok(query) => query,
        Err(errors) => return unprocessable(errors),
    };
    let page = Page::new(
        parse_page_number(params.page.as_deref()),
        state.config.page_size,
    );

    match state.catalog_store.search(&query, page) {
        Ok(mut results) => {
            let images = static_images(&state.config);
            images.sets(&mut results.sets);
            images.parts(&mut results.parts);
            Json(SearchResponse {
                title: format!("Search Results for '{}'", query.text()),
                q: query.text().to_string(),
                mode: query.mode(),
                page: page.number,
                sets: results.sets,
                parts: results.parts,
            })
            .into_response()
        }
        Err(err) => internal_error("Search failed", err),
    }
}

// =============================================================================
// Adding sets
// =============================================================================

#[derive(Deserialize, Debug, Default)]
struct AddSetForm {
    set_lego_id: Option<String>,
}

fn validate_set_lego_id(raw: Option<&str>) -> Result<String, FieldErrors> {
    let value = raw.map(str::trim).unwrap_or_default();
    let message = if value.is_empty() {
        FIELD_REQUIRED.to_string()
    } else if value.chars().count() > MAX_SET_LEGO_ID_LEN {
        format!(
            "Ensure this value has at most {} characters (it has {}).",
            MAX_SET_LEGO_ID_LEN,
            value.chars().count()
        )
    } else {
        return Ok(value.to_string());
    };
    Err(FieldErrors::from([("set_lego_id", vec![message])]))
}

fn set_detail_location(lego_id: &str) -> String {
    format!("/set/{}", urlencoding::encode(lego_id))
}

fn refresh_gauges(catalog_store: &dyn CatalogStore, image_tasks: &dyn ImageTaskStore) {
    match catalog_store.counts() {
        Ok(counts) => metrics::set_catalog_counts(&counts),
        Err(err) => warn!("Failed to count catalog items: {:#}", err),
    }
    match image_tasks.count_by_status(TaskStatus::Ready) {
        Ok(ready) => metrics::set_image_queue_ready(ready),
        Err(err) => warn!("Failed to count image tasks: {:#}", err),
    }
}

async fn add_set(
    session: Session,
    State(state): State<ServerState>,
    Form(form): Form<AddSetForm>,
) -> Response {
    let lego_id = match validate_set_lego_id(form.set_lego_id.as_deref()) {
        Ok(lego_id) => lego_id,
        Err(errors) => return unprocessable(errors),
    };
    info!("User {} adds set {}", session.user_id, lego_id);

    match state.catalog_sync.add_set(&lego_id).await {
        Ok(report) => {
            info!("Added set {}: {}", lego_id, report);
            refresh_gauges(state.catalog_store.as_ref(), state.image_tasks.as_ref());
            Redirect::to(&set_detail_location(&lego_id)).into_response()
        }
        // Already logged as a warning by the sync.
        Err(SyncError::AlreadyExists(_)) => {
            Redirect::to(&set_detail_location(&lego_id)).into_response()
        }
        Err(SyncError::Api(err)) => {
            error!("Error adding set {}: {}", lego_id, err);
            // Entries saved before the failure stay in the catalog.
            refresh_gauges(state.catalog_store.as_ref(), state.image_tasks.as_ref());
            Redirect::to("/").into_response()
        }
        Err(SyncError::Store(err)) => internal_error("Failed to save set", err),
    }
}

// =============================================================================
// Authentication
// =============================================================================

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct LoginSuccessResponse {
    token: String,
}

fn session_cookie(value: String) -> Cookie<'static> {
    Cookie::build((COOKIE_SESSION_TOKEN_KEY, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

async fn login(
    State(user_manager): State<GuardedUserManager>,
    Form(form): Form<LoginForm>,
) -> Response {
    debug!("login() called with {:?}", form);
    let start = Instant::now();

    let credentials = match user_manager.verify_password(&form.username, &form.password) {
        Ok(Some(credentials)) => credentials,
        Ok(None) => {
            info!("Failed login for {}", form.username);
            metrics::record_login_attempt("failure", start.elapsed());
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(err) => {
            metrics::record_login_attempt("error", start.elapsed());
            return internal_error("Error verifying credentials", err);
        }
    };

    match user_manager.generate_auth_token(&credentials) {
        Ok(auth_token) => {
            metrics::record_login_attempt("success", start.elapsed());
            info!("User {} logged in", form.username);
            let cookie = session_cookie(auth_token.value.0.clone());
            (
                StatusCode::CREATED,
                [(header::SET_COOKIE, cookie.to_string())],
                Json(LoginSuccessResponse {
                    token: auth_token.value.0,
                }),
            )
                .into_response()
        }
        Err(err) => {
            metrics::record_login_attempt("error", start.elapsed());
            internal_error("Error with auth token generation", err)
        }
    }
}

async fn logout(State(user_manager): State<GuardedUserManager>, session: Session) -> Response {
    match user_manager.delete_auth_token(session.user_id, &AuthTokenValue(session.token)) {
        Ok(()) => {
            let cookie = Cookie::build((COOKIE_SESSION_TOKEN_KEY, ""))
                .path("/")
                .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
                .same_site(SameSite::Lax)
                .build();

            (StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]).into_response()
        }
        Err(err) => {
            debug!("Logout failed: {:#}", err);
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

// =============================================================================
// App
// =============================================================================

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: Arc<dyn CatalogStore>,
        user_manager: Arc<UserManager>,
        catalog_sync: Arc<CatalogSync>,
        image_tasks: Arc<dyn ImageTaskStore>,
    ) -> ServerState {
        ServerState {
            config,
            catalog_store,
            user_manager,
            catalog_sync,
            image_tasks,
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let static_files_service = ServeDir::new(&state.config.static_dir);

    let catalog_routes: Router = Router::new()
        .route("/", get(index))
        .route("/set/add", post(add_set))
        .route("/set/{lego_id}", get(get_set))
        .route("/part/{lego_id}", get(get_part))
        .route("/part/{lego_id}/{color_id}", get(get_part_in_color))
        .route("/search", get(search))
        .with_state(state.clone());

    let auth_routes: Router = Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(state.clone());

    catalog_routes
        .merge(auth_routes)
        .nest_service(STATIC_URL_PREFIX, static_files_service)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the app and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;

    refresh_gauges(state.catalog_store.as_ref(), state.image_tasks.as_ref());
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let app_shutdown = shutdown.clone();
    let metrics_shutdown = shutdown.clone();
    let (served, metrics_served) = tokio::join!(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { app_shutdown.cancelled().await })
            .into_future(),
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .into_future(),
    );
    served.context("HTTP server failed")?;
    metrics_served.context("Metrics server failed")?;
    Ok(())
}
