use std::time::Duration;

use core_model::{ExtractError, Extractor};
use extractor_common::html::{Selector, select_texts};
use tracing::{debug, info, warn};

pub const DEFAULT_URL: &str = "https://jusikai.com/";
/// Tried in order; the first selector that yields any name wins.
pub const DEFAULT_SELECTORS: &[&str] = &[".ranking-stock-name", ".stock-name", ".stock_name"];

#[derive(Debug, Clone)]
pub struct MarkupSource {
    pub url: String,
    pub selectors: Vec<String>,
    pub max_name_len: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for MarkupSource {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            selectors: DEFAULT_SELECTORS.iter().map(|s| s.to_string()).collect(),
            max_name_len: extractor_common::DEFAULT_MAX_NAME_LEN,
            timeout: extractor_common::DEFAULT_TIMEOUT,
            user_agent: extractor_common::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Fetches a ranking page and reads names out of elements picked by a
/// fallback chain of class selectors.
pub struct MarkupExtractor {
    source: MarkupSource,
    selectors: Vec<(String, Selector)>,
    client: reqwest::blocking::Client,
}

impl MarkupExtractor {
    pub fn new(source: MarkupSource) -> Result<Self, ExtractError> {
        let client = extractor_common::build_client(&source.user_agent, source.timeout)?;
        let selectors = source
            .selectors
            .iter()
            .filter_map(|raw| match Selector::parse(raw) {
                Some(sel) => Some((raw.clone(), sel)),
                None => {
                    warn!(selector = %raw, "ignoring unsupported selector");
                    None
                }
            })
            .collect();
        Ok(Self {
            source,
            selectors,
            client,
        })
    }

    /// Applies the selector chain to an already fetched page.
    pub fn extract_from(&self, html: &str) -> Result<Vec<String>, ExtractError> {
        for (raw, selector) in &self.selectors {
            let texts = select_texts(html, selector);
            let names = extractor_common::normalize_names(&texts, self.source.max_name_len);
            if names.is_empty() {
                debug!(selector = %raw, elements = texts.len(), "selector produced no names");
                continue;
            }
            info!(selector = %raw, names = names.len(), "names extracted");
            return Ok(names);
        }
        Err(ExtractError::NoMatches {
            source_ref: self.source.url.clone(),
            tried: self
                .selectors
                .iter()
                .map(|(raw, _)| raw.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl Extractor for MarkupExtractor {
    fn kind(&self) -> &'static str {
        "markup"
    }

    fn extract(&self) -> Result<Vec<String>, ExtractError> {
        let html = extractor_common::fetch_page(&self.client, &self.source.url)?;
        self.extract_from(&html)
    }
}
