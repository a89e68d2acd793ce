//! Prometheus 指标导出

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::{error::ApiError, state::AppState};

/// HTTP 请求数，带 `method`、`handler`、`status` 标签。
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// HTTP 请求耗时（秒），带 `method`、`handler` 标签。
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(HTTP_REQUEST_DURATION.to_owned()),
        DURATION_BUCKETS,
    )
}

/// 安装全局 recorder，进程内只能调用一次。
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// 按匹配到的路由模板记录请求数和耗时，`/metrics` 自身不计入。
pub(crate) async fn track_requests(request: Request, next: Next) -> Response {
    let handler = match request.extensions().get::<MatchedPath>() {
        Some(path) if path.as_str() != "/metrics" => path.as_str().to_owned(),
        _ => return next.run(request).await,
    };
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    ::metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "handler" => handler.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    ::metrics::histogram!(HTTP_REQUEST_DURATION, "method" => method, "handler" => handler)
        .record(started.elapsed().as_secs_f64());

    response
}

pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "METRICS_DISABLED", "metrics are disabled")
            .into_response(),
    }
}
