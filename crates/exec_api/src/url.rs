/// Default base URL of a locally started execution service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub const HEALTH_PATH: &str = "/api/health";
pub const RUN_PATH: &str = "/api/run-code";
pub const HINT_PATH: &str = "/api/hint";
pub const LIVE_PATH: &str = "/ws/execute";

/// Normalize a base URL to the service root.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are dropped
/// 3) a trailing `/api` segment is dropped so endpoint paths are not doubled
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    trimmed.to_string()
}

pub fn health_url(base: &str) -> String {
    format!("{}{HEALTH_PATH}", normalize_base_url(base))
}

pub fn run_url(base: &str) -> String {
    format!("{}{RUN_PATH}", normalize_base_url(base))
}

pub fn hint_url(base: &str) -> String {
    format!("{}{HINT_PATH}", normalize_base_url(base))
}

/// Derive the live channel URL from an HTTP base URL.
///
/// `http` maps to `ws` and `https` maps to `wss`; a base already using a
/// WebSocket scheme is kept as is.
pub fn live_url(base: &str) -> String {
    let root = normalize_base_url(base);
    let root = if let Some(rest) = root.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = root.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        root
    };
    format!("{root}{LIVE_PATH}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_base_falls_back_to_default() {
        assert_eq!(normalize_base_url("  "), DEFAULT_BASE_URL);
    }

    #[test]
    fn api_suffix_is_not_doubled() {
        assert_eq!(
            run_url("http://127.0.0.1:9000/api/"),
            "http://127.0.0.1:9000/api/run-code"
        );
        assert_eq!(
            health_url("http://127.0.0.1:9000"),
            "http://127.0.0.1:9000/api/health"
        );
    }

    #[test]
    fn live_url_switches_scheme() {
        assert_eq!(live_url("http://host:8000"), "ws://host:8000/ws/execute");
        assert_eq!(live_url("https://host/api"), "wss://host/ws/execute");
        assert_eq!(live_url("ws://host:1"), "ws://host:1/ws/execute");
    }
}
