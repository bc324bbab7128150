use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// JSON-only API: nothing is allowed to load from it.
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("FRONTEND_URL is not a valid origin, allowing any origin");
            cors.allow_origin(tower_http::cors::Any)
        }
    }
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.frontend_url);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/loop", loop_routes(app_state.clone()))
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware))
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn loop_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Both calls reach the upstream model
    let generation_routes = Router::new()
        .route(
            "/from-attempt/{attempt_id}",
            post(handlers::loops::start_from_attempt),
        )
        .route(
            "/{loop_id}/from-practice",
            post(handlers::loops::generate_from_practice),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::generation_rate_limit_middleware,
        ));

    Router::new()
        .route("/active", get(handlers::loops::list_active))
        .route(
            "/{loop_id}/questions",
            get(handlers::loops::current_questions),
        )
        .route("/{loop_id}/submit", post(handlers::loops::submit_answers))
        .route("/{loop_id}/results", get(handlers::loops::session_results))
        .route("/{loop_id}/end", post(handlers::loops::end_loop))
        .merge(generation_routes)
        .route_layer(middleware::from_fn(
            middlewares::auth::student_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
