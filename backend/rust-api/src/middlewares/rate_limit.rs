use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::metrics::track_cache_operation;
use crate::services::AppState;

// Generation calls hit a paid upstream model, so they get their own budget.
const GENERATION_LIMIT_PER_STUDENT: u32 = 10; // requests per window
const GENERATION_LIMIT_PER_IP: u32 = 30;
const GENERATION_WINDOW_SECONDS: u64 = 900; // 15 minutes

const FIXED_WINDOW_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            // forwarded: for=1.2.3.4; proto=http; by=...
            for part in s.split(';') {
                if let Some(val) = part.trim().strip_prefix("for=") {
                    return val.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn limit_from_env(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Throttles practice-question generation per student and per client IP.
/// Skipped when Redis is not configured or `RATE_LIMIT_DISABLED=1`.
pub async fn generation_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(request).await);
    };
    if std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1" {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());
    let student_id = request
        .extensions()
        .get::<super::auth::JwtClaims>()
        .map(|claims| claims.sub.clone());

    if let Some(sid) = &student_id {
        let limit = limit_from_env("RATE_LIMIT_GENERATION_PER_STUDENT", GENERATION_LIMIT_PER_STUDENT);
        if !allow(redis, &format!("ratelimit:generation:student:{}", sid), limit).await? {
            tracing::warn!("Generation rate limit exceeded for student: {}", sid);
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    let limit = limit_from_env("RATE_LIMIT_GENERATION_PER_IP", GENERATION_LIMIT_PER_IP);
    if !allow(redis, &format!("ratelimit:generation:ip:{}", client_ip), limit).await? {
        tracing::warn!("Generation rate limit exceeded for IP: {}", client_ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

async fn allow(redis: &ConnectionManager, key: &str, limit: u32) -> Result<bool, StatusCode> {
    track_cache_operation(
        "rate_limit",
        check_rate_limit_with_window(redis, key, limit, GENERATION_WINDOW_SECONDS),
    )
    .await
    .map_err(|e| {
        tracing::error!("Rate limit check failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Fixed-window counter, atomic through a Lua script.
async fn check_rate_limit_with_window(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> anyhow::Result<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = redis::Script::new(FIXED_WINDOW_SCRIPT)
        .key(key)
        .arg(limit)
        .arg(window_seconds)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}
