use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::metrics::Route;
use crate::{Server, ServerConfig};

mod error;
mod http;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct Api {
    server: Arc<Server>,
}

/// Browser origin policy. Requests without an `Origin` header come from
/// non-browser clients.
#[derive(Clone)]
struct OriginPolicy {
    allowed: Arc<HashSet<String>>,
    allow_any: bool,
    allow_missing: bool,
}

impl OriginPolicy {
    fn from_config(config: &ServerConfig) -> Self {
        let allowed: HashSet<String> = config.allowed_origins.iter().cloned().collect();
        if allowed.is_empty() {
            tracing::warn!("no allowed origins configured; all browser origins will be rejected");
        }
        Self {
            allow_any: allowed.contains("*"),
            allowed: Arc::new(allowed),
            allow_missing: config.allow_no_origin,
        }
    }

    fn check(&self, origin: Option<&str>) -> Result<(), &'static str> {
        match origin {
            Some(_) if self.allow_any => Ok(()),
            Some(origin) if self.allowed.contains(origin) => Ok(()),
            Some(_) => Err("Origin not allowed"),
            None if self.allow_missing => Ok(()),
            None => Err("Origin required"),
        }
    }

    fn cors_layer(&self) -> CorsLayer {
        let allow_origin = if self.allow_any {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(self.allowed.iter().filter_map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| tracing::warn!(origin = %origin, "ignoring invalid allowed origin"))
                    .ok()
            }))
        };
        CorsLayer::new()
            .allow_origin(allow_origin)
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
                header::HeaderName::from_static(REQUEST_ID_HEADER),
                header::HeaderName::from_static("x-user-id"),
                header::HeaderName::from_static("idempotency-key"),
            ])
            .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)])
    }
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn governor_config(rate_per_second: u64, burst_size: u32) -> Option<Arc<IpGovernorConfig>> {
    if rate_per_second == 0 || burst_size == 0 {
        return None;
    }
    let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_nanos(nanos_per_request))
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish();
    if config.is_none() {
        tracing::warn!(
            rate_per_second,
            burst_size,
            "invalid rate-limit config; rate limiting disabled"
        );
    }
    config.map(Arc::new)
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        let config = self.server.config();
        let origin_policy = OriginPolicy::from_config(config);
        let cors = origin_policy.cors_layer();
        let governor_conf = match (config.http_rate_limit_per_second, config.http_rate_limit_burst)
        {
            (Some(rate_per_second), Some(burst_size)) => {
                governor_config(rate_per_second, burst_size)
            }
            _ => None,
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/config", get(http::config))
            .route("/metrics", get(http::metrics))
            .route("/packs/open", post(http::open_packs))
            .route("/battles", get(http::list_battles).post(http::create_battle))
            .route(
                "/battles/:id/join",
                post(http::join_battle).delete(http::leave_battle),
            )
            .route(
                "/battles/:id/ready",
                post(http::set_ready).delete(http::clear_ready),
            )
            .route("/battles/:id/bots", post(http::add_bots))
            .route("/battles/:id/start", post(http::start_battle))
            .route("/battles/:id/cancel", post(http::cancel_battle))
            .route("/battles/:id/status", get(http::battle_status))
            .route("/battles/:id/replay", get(http::battle_replay))
            .route("/cards/sell", post(http::sell_card))
            .route("/boxes", get(http::list_boxes))
            .route("/boxes/:id", get(http::get_box))
            .route("/accounts/:user_id", get(http::get_account))
            .route("/users/:user_id/pulls", get(http::get_inventory))
            .route(
                "/admin/boxes",
                post(http::publish_box).put(http::publish_box),
            )
            .route("/admin/boxes/:id/invalidate", post(http::invalidate_box))
            .route("/admin/cache/clear", post(http::clear_box_cache))
            .route("/admin/accounts/:user_id/grant", post(http::grant_coins));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };
        let router = router.layer(cors);
        let router = router.layer(middleware::from_fn(move |req, next| {
            let origin_policy = origin_policy.clone();
            async move { enforce_origin(origin_policy, req, next).await }
        }));
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.server.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.server.clone())
    }
}

/// Marks responses produced by [`enforce_origin`].
#[derive(Clone, Copy)]
struct OriginRejected;

fn reject_origin(message: &'static str) -> Response {
    let mut response = (StatusCode::FORBIDDEN, message).into_response();
    response.extensions_mut().insert(OriginRejected);
    response
}

async fn enforce_origin(policy: OriginPolicy, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    match policy.check(origin) {
        Ok(()) => next.run(req).await,
        Err(message) => reject_origin(message),
    }
}

async fn request_id_middleware(
    AxumState(server): AxumState<Arc<Server>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    match response.status() {
        StatusCode::FORBIDDEN if response.extensions().get::<OriginRejected>().is_some() => {
            server.http_metrics().inc_reject_origin()
        }
        StatusCode::PAYLOAD_TOO_LARGE => server.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => server.http_metrics().inc_reject_rate_limit(),
        _ => server
            .http_metrics()
            .record(Route::classify(&method, &path), elapsed),
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static(REQUEST_ID_HEADER),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "http.request"
    );
    response
}
