//! server - REST API
//!
//! An axum router under `/api` over the [`Sdlc`](crate::service::Sdlc)
//! facade.
//!
//! # Scopes
//!
//! Resources hang off scope prefixes below `/api/projects/{project}`:
//!
//! | scope                | prefix                                              |
//! |----------------------|-----------------------------------------------------|
//! | project              | ``                                                  |
//! | patch                | `/patches/{patch}`                                  |
//! | workspace            | `[/patches/{patch}]/workspaces/{workspace}`         |
//! | group workspace      | `[/patches/{patch}]/groupWorkspaces/{workspace}`    |
//! | conflict resolution  | `<workspace>/conflictResolution`                    |
//! | backup               | `<workspace>/backup`                                |
//! | version              | `/versions/{version}`                               |
//!
//! Every scope serves entity and configuration reads; branch scopes add
//! history; workspace and conflict-resolution scopes accept writes.
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::server::{router, AppState};
//!
//! let state = AppState::from_config(config.clone())?;
//! let listener = tokio::net::TcpListener::bind(("127.0.0.1", 6100)).await?;
//! axum::serve(listener, router(state)).await?;
//! ```

pub mod caller;
pub mod error;
pub mod handlers;
pub mod scope;
pub mod state;

use std::time::Duration;

use axum::http::{header, HeaderName, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::PRIVATE_TOKEN_HEADER;
use crate::core::workspace::{WorkspaceAccessType, WorkspaceType};
use handlers::{auth, entities, projects, reviews, versions, workspaces};
use scope::ScopeKind;

pub use error::ApiError;
pub use state::AppState;

/// Entity and configuration reads, plus history and writes when asked.
fn scope_routes(history: bool, write: bool) -> Router<AppState> {
    let mut entity = get(entities::get);
    let mut configuration = get(entities::configuration);
    if write {
        entity = entity.put(entities::put).delete(entities::delete);
        configuration = configuration.put(entities::update_configuration);
    }

    let mut router = Router::new()
        .route("/entities", get(entities::list))
        .route("/entities/{entity}", entity)
        .route("/entityPaths", get(entities::paths))
        .route("/configuration", configuration);
    if history {
        router = router
            .route("/revisions", get(entities::revisions))
            .route("/revisions/{revision}", get(entities::revision))
            .route("/entities/{entity}/revisions", get(entities::entity_revisions))
            .route("/packages/{package}/revisions", get(entities::package_revisions));
    }
    if write {
        router = router.route("/entityChanges", post(entities::perform_changes));
    }
    router
}

/// Workspace listings and reviews of a project or patch.
fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/workspaces", get(workspaces::list_user))
        .route("/workspaces/all", get(workspaces::list_all))
        .route("/groupWorkspaces", get(workspaces::list_group))
        .route("/reviews", get(reviews::list).post(reviews::create))
        .route("/reviews/{review}", get(reviews::get).put(reviews::edit))
        .route("/reviews/{review}/close", post(reviews::close))
        .route("/reviews/{review}/reopen", post(reviews::reopen))
        .route("/reviews/{review}/commit", post(reviews::commit))
        .route("/reviews/{review}/approve", post(reviews::approve))
        .route("/reviews/{review}/revokeApproval", post(reviews::revoke_approval))
        .route("/reviews/{review}/approval", get(reviews::approval))
        .route("/reviews/{review}/comparison", get(reviews::comparison))
}

fn workspace_scope(workspace_type: WorkspaceType) -> Router<AppState> {
    let conflict = scope_routes(true, true)
        .route("/discard", post(workspaces::discard_resolution))
        .route("/discardChanges", post(workspaces::discard_resolution_changes))
        .route("/accept", post(workspaces::accept_resolution))
        .layer(Extension(ScopeKind::Workspace(
            workspace_type,
            WorkspaceAccessType::ConflictResolution,
        )));

    let backup = scope_routes(true, false)
        .route("/discard", post(workspaces::discard_backup))
        .route("/recover", post(workspaces::recover_backup))
        .layer(Extension(ScopeKind::Workspace(
            workspace_type,
            WorkspaceAccessType::Backup,
        )));

    scope_routes(true, true)
        .route(
            "/",
            get(workspaces::get)
                .post(workspaces::create)
                .delete(workspaces::delete),
        )
        .route("/outdated", get(workspaces::outdated))
        .route("/inConflictResolutionMode", get(workspaces::in_conflict_resolution))
        .route("/update", post(workspaces::update))
        .route("/comparisons/creation", get(workspaces::creation_comparison))
        .route("/comparisons/source", get(workspaces::source_comparison))
        .layer(Extension(ScopeKind::Workspace(
            workspace_type,
            WorkspaceAccessType::Workspace,
        )))
        .nest("/conflictResolution", conflict)
        .nest("/backup", backup)
}

/// Workspaces nested below a project or patch.
fn with_workspaces(router: Router<AppState>) -> Router<AppState> {
    router
        .nest("/workspaces/{workspace}", workspace_scope(WorkspaceType::User))
        .nest("/groupWorkspaces/{workspace}", workspace_scope(WorkspaceType::Group))
}

fn patch_scope() -> Router<AppState> {
    let own = scope_routes(true, false)
        .merge(collection_routes())
        .route("/", get(versions::get_patch).delete(versions::delete_patch))
        .route("/release", post(versions::release_patch))
        .layer(Extension(ScopeKind::Patch));
    with_workspaces(own)
}

fn version_scope() -> Router<AppState> {
    scope_routes(false, false)
        .route("/", get(versions::get))
        .layer(Extension(ScopeKind::Version))
}

fn project_scope() -> Router<AppState> {
    let own = scope_routes(true, false)
        .merge(collection_routes())
        .route("/versions", get(versions::list).post(versions::create))
        .route("/patches", get(versions::list_patches).post(versions::create_patch))
        .layer(Extension(ScopeKind::Project));

    with_workspaces(own)
        .route(
            "/",
            get(projects::get).put(projects::update).delete(projects::delete),
        )
        .nest("/patches/{patch}", patch_scope())
        .nest("/versions/{version}", version_scope())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(PRIVATE_TOKEN_HEADER),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Requests running longer than `timeout` answer 408.
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// The full API router with tracing, timeout and CORS layers.
pub fn router(state: AppState) -> Router {
    let timeout = state.config().request_timeout();

    let api = Router::new()
        .route("/info", get(handlers::info))
        .route("/health", get(handlers::health))
        .route("/auth/authorize", get(auth::authorize))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/authorized", get(auth::authorized))
        .route("/auth/logout", post(auth::logout))
        .route("/currentUser", get(handlers::current_user))
        .route("/users", get(handlers::users))
        .route("/projects", get(projects::list).post(projects::create))
        .nest("/projects/{project}", project_scope());

    Router::new()
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors())
                .layer(timeout_layer(timeout)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, ServerConfig};
    use crate::store::FileSystemBackend;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(root: &std::path::Path) -> Router {
        let file: ServerConfig = toml::from_str(&format!(
            "[filesystem]\nroot = {:?}\ndefault_user = \"alice\"\n",
            root.display().to_string()
        ))
        .unwrap();
        let state = AppState::new(Config::new(file).unwrap(), Arc::new(FileSystemBackend::new(root)));
        router(state)
    }

    async fn send(app: &Router, method: Method, uri: &str) -> StatusCode {
        app.clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn info_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        assert_eq!(send(&app, Method::GET, "/api/health").await, StatusCode::OK);
        assert_eq!(send(&app, Method::GET, "/api/info").await, StatusCode::OK);
        assert_eq!(send(&app, Method::GET, "/api/nothing").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn slow_requests_time_out() {
        let app: Router = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(timeout_layer(Duration::from_millis(20)));
        assert_eq!(send(&app, Method::GET, "/slow").await, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn scope_routes_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        // unknown project: the routes exist and the service answers 404
        for uri in [
            "/api/projects/p1",
            "/api/projects/p1/entities",
            "/api/projects/p1/workspaces/w1",
            "/api/projects/p1/workspaces/w1/conflictResolution/entities",
            "/api/projects/p1/groupWorkspaces/w1/backup/entities",
            "/api/projects/p1/patches/1.0.1/entities",
            "/api/projects/p1/patches/1.0.1/workspaces/w1/entities",
            "/api/projects/p1/versions/1.0.0/entities",
        ] {
            assert_eq!(send(&app, Method::GET, uri).await, StatusCode::NOT_FOUND, "{uri}");
        }
        // writes are not routed on read-only scopes
        assert_eq!(
            send(&app, Method::POST, "/api/projects/p1/entityChanges").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            send(&app, Method::PUT, "/api/projects/p1/workspaces/w1/backup/configuration").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            send(&app, Method::GET, "/api/projects/p1/patches/not-a-version/entities").await,
            StatusCode::BAD_REQUEST
        );
    }
}
