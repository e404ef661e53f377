//! Best-effort HTTP(S) proxy discovery for the container build step.
//! Never blocks or fails a build: any error here just means no proxy is
//! passed through.

use std::env;
use std::time::Duration;

/// Checks the usual environment variables first, then falls back to a
/// PAC file if `BASTION_PAC_URL` is set. Returns `None` on any failure.
pub fn discover_proxy() -> Option<String> {
    if let Some(proxy) = env_proxy() {
        return Some(proxy);
    }
    pac_proxy()
}

fn env_proxy() -> Option<String> {
    for key in ["https_proxy", "HTTPS_PROXY", "http_proxy", "HTTP_PROXY"] {
        if let Ok(value) = env::var(key) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn pac_proxy() -> Option<String> {
    let url = env::var("BASTION_PAC_URL").ok()?;
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .ok()?;
    let body = client.get(&url).send().ok()?.text().ok()?;
    extract_first_proxy(&body)
}

/// Minimal `FindProxyForURL` shim: looks for the first `PROXY host:port`
/// literal in a `return "..."` string, without evaluating the PAC
/// script's JavaScript. Good enough for the common static-PAC case;
/// scripted proxy selection falls back to no proxy.
fn extract_first_proxy(pac_source: &str) -> Option<String> {
    for line in pac_source.lines() {
        if let Some(start) = line.find("PROXY ") {
            let rest = &line[start + "PROXY ".len()..];
            let end = rest
                .find(|c: char| c == '"' || c == '\'' || c == ';')
                .unwrap_or(rest.len());
            let candidate = rest[..end].trim();
            if !candidate.is_empty() {
                return Some(format!("http://{candidate}"));
            }
        }
    }
    None
}
