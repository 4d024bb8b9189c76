//! Request and environment facts supplied by the host.
//!
//! The collector never touches HTTP plumbing itself; the host extracts the
//! scalar facts it has and hands them over through a
//! [`RequestDataProvider`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Facts about the request being profiled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub host: Option<String>,
    pub https: bool,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
    pub post: Map<String, Value>,
    pub cookies: Map<String, Value>,
    pub session: Map<String, Value>,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            method: "CLI".to_string(),
            uri: "N/A".to_string(),
            host: None,
            https: false,
            user_agent: None,
            remote_addr: None,
            headers: Map::new(),
            query: Map::new(),
            post: Map::new(),
            cookies: Map::new(),
            session: Map::new(),
        }
    }
}

const CLIENT_IP_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "client-ip"];

impl RequestInfo {
    /// Case-insensitive header lookup; non-string values are ignored
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_str())
    }

    /// Best-effort client address
    ///
    /// Proxy headers win over the socket address; for a forwarded chain
    /// the first hop is the client.
    pub fn client_ip(&self) -> String {
        CLIENT_IP_HEADERS
            .iter()
            .filter_map(|name| self.header(name))
            .chain(self.remote_addr.as_deref())
            .map(|raw| raw.split(',').next().unwrap_or(raw).trim())
            .find(|ip| !ip.is_empty())
            .unwrap_or("127.0.0.1")
            .to_string()
    }

    pub fn full_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let host = self
            .host
            .as_deref()
            .or_else(|| self.header("host"))
            .unwrap_or("localhost");
        let uri = if self.uri == "N/A" { "/" } else { self.uri.as_str() };
        format!("{}://{}{}", scheme, host, uri)
    }

    pub fn user_agent_or_default(&self) -> String {
        self.user_agent
            .as_deref()
            .or_else(|| self.header("user-agent"))
            .unwrap_or("N/A")
            .to_string()
    }
}

/// Facts about the hosting runtime and its limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentInfo {
    pub runtime_version: String,
    pub collector_version: String,
    pub server_software: String,
    pub server_name: String,
    pub document_root: String,
    /// Memory limit as configured, e.g. `"128M"` or `"-1"` for unlimited
    pub memory_limit: String,
    pub max_execution_time: String,
    pub post_max_size: String,
    pub upload_max_filesize: String,
    pub max_input_vars: String,
    pub extensions: Vec<String>,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            runtime_version: "N/A".to_string(),
            collector_version: env!("CARGO_PKG_VERSION").to_string(),
            server_software: "N/A".to_string(),
            server_name: "localhost".to_string(),
            document_root: "N/A".to_string(),
            memory_limit: "-1".to_string(),
            max_execution_time: "0".to_string(),
            post_max_size: "N/A".to_string(),
            upload_max_filesize: "N/A".to_string(),
            max_input_vars: "N/A".to_string(),
            extensions: Vec::new(),
        }
    }
}

impl EnvironmentInfo {
    /// Parsed memory limit in bytes, `None` when unlimited or unparseable
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        parse_memory_limit(&self.memory_limit)
    }
}

/// Parse a size limit like `"128M"`, `"1G"`, `"512K"` or plain bytes
///
/// `"-1"` (unlimited), zero and garbage all yield `None`.
pub fn parse_memory_limit(limit: &str) -> Option<u64> {
    let limit = limit.trim();
    let (digits, multiplier) = match limit.chars().last()?.to_ascii_uppercase() {
        'G' => (&limit[..limit.len() - 1], 1024 * 1024 * 1024),
        'M' => (&limit[..limit.len() - 1], 1024 * 1024),
        'K' => (&limit[..limit.len() - 1], 1024),
        _ => (limit, 1),
    };

    let value: u64 = digits.trim().parse().ok()?;
    match value.checked_mul(multiplier) {
        Some(0) | None => None,
        Some(bytes) => Some(bytes),
    }
}

/// Host-side source of request and environment facts
pub trait RequestDataProvider: Send {
    fn request(&self) -> RequestInfo;
    fn environment(&self) -> EnvironmentInfo;
}

/// Provider over facts captured up front
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticRequestData {
    pub request: RequestInfo,
    pub environment: EnvironmentInfo,
}

impl StaticRequestData {
    pub fn new(request: RequestInfo, environment: EnvironmentInfo) -> Self {
        Self { request, environment }
    }
}

impl RequestDataProvider for StaticRequestData {
    fn request(&self) -> RequestInfo {
        self.request.clone()
    }

    fn environment(&self) -> EnvironmentInfo {
        self.environment.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_headers(headers: Value) -> RequestInfo {
        RequestInfo {
            headers: headers.as_object().cloned().unwrap_or_default(),
            remote_addr: Some("10.0.0.9".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_ip_prefers_forwarded_first_hop() {
        let request = request_with_headers(json!({
            "X-Forwarded-For": "203.0.113.7, 10.0.0.1",
            "X-Real-IP": "198.51.100.2"
        }));
        assert_eq!(request.client_ip(), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_fallbacks() {
        let request = request_with_headers(json!({ "x-real-ip": "198.51.100.2" }));
        assert_eq!(request.client_ip(), "198.51.100.2");

        let request = request_with_headers(json!({}));
        assert_eq!(request.client_ip(), "10.0.0.9");

        assert_eq!(RequestInfo::default().client_ip(), "127.0.0.1");
    }

    #[test]
    fn test_full_url() {
        let request = RequestInfo {
            uri: "/users?page=2".to_string(),
            https: true,
            headers: json!({ "Host": "example.test" }).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert_eq!(request.full_url(), "https://example.test/users?page=2");
        assert_eq!(RequestInfo::default().full_url(), "http://localhost/");
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("128M"), Some(128 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("512K"), Some(512 * 1024));
        assert_eq!(parse_memory_limit("1048576"), Some(1_048_576));
        assert_eq!(parse_memory_limit("-1"), None);
        assert_eq!(parse_memory_limit(""), None);
        assert_eq!(parse_memory_limit("lots"), None);
    }

    #[test]
    fn test_request_defaults_from_partial_json() {
        let data: StaticRequestData = serde_json::from_value(json!({
            "request": { "method": "POST", "uri": "/login" }
        }))
        .unwrap();

        assert_eq!(data.request().method, "POST");
        assert_eq!(data.request().user_agent_or_default(), "N/A");
        assert_eq!(data.environment().memory_limit, "-1");
    }
}
