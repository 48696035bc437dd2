use reqwest::StatusCode;

use airbear_logic::prelude::*;

const fn api_host() -> &'static str {
    if let Some(host) = option_env!("AIRBEAR_API_HOST") {
        host
    } else {
        "localhost"
    }
}

const fn api_port() -> u16 {
    if let Some(port) = option_env!("AIRBEAR_API_PORT") {
        const_str::parse!(port, u16)
    } else {
        4114
    }
}

const fn api_secure() -> bool {
    if let Some(secure) = option_env!("AIRBEAR_API_SECURE") {
        const_str::eq_ignore_ascii_case!(secure, "true") || const_str::equal!(secure, "1")
    } else {
        false
    }
}

const fn api_proto() -> &'static str {
    if api_secure() { "https" } else { "http" }
}

const API_HOST: &str = api_host();
const API_PORT: u16 = api_port();
const API_PROTO: &str = api_proto();

const API_SOCKET: &str = const_str::concat!(API_HOST, ":", API_PORT);

/// Where the backing server lives, baked in at build time
pub const API_BASE_URL: &str = const_str::concat!(API_PROTO, "://", API_SOCKET);

pub async fn health_check(base_url: &str) -> Result<bool> {
    let url = format!("{base_url}/health");
    reqwest::get(url)
        .await
        .map(|resp| resp.status() == StatusCode::OK)
        .context("Failed to make request")
}
