//! Narrow request value the guard components operate on.

use std::collections::BTreeMap;
use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::request::Parts;

/// Transport-free rendering of one request, built once at pipeline entry
/// so the matcher and profiler never touch framework objects.
#[derive(Debug, Clone)]
pub struct SerializedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// Header names lower-cased; values as received.
    pub headers: Vec<(String, String)>,
    /// UTF-8 body text; `None` for binary or oversized bodies, which skip
    /// textual analysis.
    pub body: Option<String>,
    pub source_addr: IpAddr,
}

impl SerializedRequest {
    pub fn from_parts(parts: &Parts, body: &Bytes, fallback_addr: IpAddr) -> Self {
        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    value.to_str().unwrap_or("").to_string(),
                )
            })
            .collect();

        // Prefer the first forwarded hop, as upstream proxies set it.
        let source_addr = headers
            .iter()
            .find(|(name, _)| name == "x-forwarded-for")
            .and_then(|(_, value)| value.split(',').next())
            .and_then(|ip| ip.trim().parse().ok())
            .unwrap_or(fallback_addr);

        Self {
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or("").to_string(),
            headers,
            body: std::str::from_utf8(body).ok().map(|s| s.to_string()),
            source_addr,
        }
    }

    /// "METHOD:path" key used by the profiler and reputation tracker.
    pub fn route_key(&self) -> String {
        format!("{}:{}", self.method, self.path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    pub fn content_type_is_xml(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_lowercase().contains("xml"))
            .unwrap_or(false)
    }

    /// Value of a cookie from the `Cookie` header, if present.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let cookies = self.header("cookie")?;
        cookies.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// The concatenated, lower-cased textual surface the matcher scans.
    pub fn surface_text(&self) -> String {
        let mut surface = String::with_capacity(
            self.path.len()
                + self.query.len()
                + self.body.as_deref().map(str::len).unwrap_or(0)
                + 256,
        );
        surface.push_str(&self.path);
        surface.push(' ');
        // Scan the decoded query so percent-encoding cannot hide a payload.
        for (key, value) in url::form_urlencoded::parse(self.query.as_bytes()) {
            surface.push_str(&key);
            surface.push('=');
            surface.push_str(&value);
            surface.push(' ');
        }
        if let Some(body) = &self.body {
            surface.push_str(body);
            surface.push(' ');
        }
        for (name, value) in &self.headers {
            surface.push_str(name);
            surface.push(':');
            surface.push_str(value);
            surface.push(' ');
        }
        surface.to_lowercase()
    }

    /// Flat string fields from a JSON object or urlencoded body, used for
    /// honeypot field checks and CSRF form fallback.
    pub fn form_fields(&self) -> BTreeMap<String, String> {
        let Some(body) = &self.body else {
            return BTreeMap::new();
        };
        let content_type = self.header("content-type").unwrap_or("");

        if content_type.contains("application/json") || body.trim_start().starts_with('{') {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body) {
                return map
                    .into_iter()
                    .map(|(k, v)| {
                        let rendered = match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, rendered)
                    })
                    .collect();
            }
        }
        if content_type.contains("application/x-www-form-urlencoded") {
            return url::form_urlencoded::parse(body.as_bytes())
                .into_owned()
                .collect();
        }
        BTreeMap::new()
    }

    /// Parameter names from the query string and body fields.
    pub fn param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = url::form_urlencoded::parse(self.query.as_bytes())
            .map(|(k, _)| k.into_owned())
            .collect();
        names.extend(self.form_fields().into_keys());
        names
    }

    /// Header names only, for baseline tracking.
    pub fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|(n, _)| n.clone()).collect()
    }
}
