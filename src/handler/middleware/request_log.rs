use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::{sync::Arc, time::Instant};
use tracing::field::{Field, Visit};
use tracing::info;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const ACCESS_LOG_TARGET: &str = "http.access";

/// Renders `http.access` events as one pipe-separated line and everything
/// else with the default formatter.
#[derive(Clone, Default)]
pub struct AccessLogEventFormat<T = SystemTime> {
    timer: T,
}

impl<T> AccessLogEventFormat<T>
where
    T: FormatTime,
{
    pub fn new(timer: T) -> Self {
        Self { timer }
    }
}

#[derive(Default)]
struct AccessLine {
    client_ip: Option<String>,
    method: Option<String>,
    status: Option<u16>,
    user_agent: Option<String>,
    cost_ms: Option<f64>,
    uri: Option<String>,
}

impl AccessLine {
    fn set_str(&mut self, name: &str, value: String) {
        match name {
            "client_ip" => self.client_ip = Some(value),
            "method" => self.method = Some(value),
            "user_agent" => self.user_agent = Some(value),
            "uri" => self.uri = Some(value),
            _ => {}
        }
    }

    fn write_to(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let dash = || "-".to_string();
        writeln!(
            writer,
            "{} | {} | {} | {} | {} | {}",
            self.client_ip.as_deref().unwrap_or("-"),
            self.method.as_deref().unwrap_or("-"),
            self.status.map(|s| s.to_string()).unwrap_or_else(dash),
            self.cost_ms
                .map(|ms| format!("{ms:.3}ms"))
                .unwrap_or_else(dash),
            self.user_agent.as_deref().unwrap_or("-"),
            self.uri.as_deref().unwrap_or("-"),
        )
    }
}

impl Visit for AccessLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set_str(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.set_str(field.name(), rendered.trim_matches('"').to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "status" {
            self.status = u16::try_from(value).ok();
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if field.name() == "cost_ms" {
            self.cost_ms = Some(value);
        }
    }
}

impl<S, N, T> FormatEvent<S, N> for AccessLogEventFormat<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    T: FormatTime + Clone,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != ACCESS_LOG_TARGET {
            return format::Format::default()
                .with_timer(self.timer.clone())
                .with_target(true)
                .with_source_location(false)
                .format_event(ctx, writer, event);
        }
        let mut line = AccessLine::default();
        event.record(&mut line);
        self.timer.format_time(&mut writer)?;
        write!(writer, " {} {} | ", metadata.level(), metadata.target())?;
        line.write_to(&mut writer)
    }
}

fn should_skip_logging(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    })
}

/// First address of `X-Forwarded-For`, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "-".to_string())
}

/// Logs each request once the handler returns.
pub async fn log_requests(
    State(skip_paths): State<Arc<Vec<String>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let path = req.uri().path().to_string();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client_ip = client_ip(req.headers(), peer);
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(req).await;

    if !should_skip_logging(&path, skip_paths.as_slice()) {
        info!(
            target: ACCESS_LOG_TARGET,
            client_ip = client_ip.as_str(),
            method = method.as_str(),
            status = response.status().as_u16(),
            cost_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
            user_agent = user_agent.as_str(),
            uri = uri.as_str(),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_skip_patterns() {
        let patterns = vec!["/health".to_string(), "/static/*".to_string()];
        assert!(should_skip_logging("/health", &patterns));
        assert!(should_skip_logging("/static/app.js", &patterns));
        assert!(!should_skip_logging("/callback/voice", &patterns));
    }

    #[test]
    fn test_client_ip() {
        let peer: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.7");
        assert_eq!(client_ip(&headers, None), "-");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
    }
}
