use std::collections::HashSet;
use std::time::Duration;

use core_model::ExtractError;
use tracing::debug;

pub mod html;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Ranking pages list names, not headlines; longer tokens are noise.
pub const DEFAULT_MAX_NAME_LEN: usize = 10;

/// Cleans one raw batch: collapses whitespace, drops empty tokens and tokens
/// longer than `max_len` characters, and keeps only the first occurrence of
/// each name.
pub fn normalize_names<I, S>(raw: I, max_len: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut too_long = 0usize;
    for item in raw {
        let name = item.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            continue;
        }
        if name.chars().count() > max_len {
            too_long += 1;
            continue;
        }
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    if too_long > 0 {
        debug!(too_long, max_len, "dropped over-long tokens");
    }
    out
}

pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::blocking::Client, ExtractError> {
    reqwest::blocking::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ExtractError::ClientInit(e.to_string()))
}

/// GETs `url` and returns the body of a 2xx response.
pub fn fetch_page(client: &reqwest::blocking::Client, url: &str) -> Result<String, ExtractError> {
    let response = client.get(url).send().map_err(|e| ExtractError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.text().map_err(|e| ExtractError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    debug!(url, bytes = body.len(), "page fetched");
    Ok(body)
}
