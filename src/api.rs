use reqwest::Url;

use crate::{Error, Result, SEARCH_LAST_SEARCH};

/// Builds the upstream API urls from a configured base.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Per-profile post listing.
    pub fn profile_posts(&self, user_id: u64, offset: usize, limit: usize) -> Result<String> {
        let url = format!("{}/profile/posts", self.base);
        Self::with_params(
            &url,
            &[
                ("profile_user_id", user_id.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
        )
    }

    /// Global publication search.
    pub fn publication_search(&self, query: &str, page: usize) -> Result<String> {
        let url = format!("{}/publication/search", self.base);
        Self::with_params(
            &url,
            &[
                ("query", query.to_string()),
                ("page", page.to_string()),
                ("lastSearch", SEARCH_LAST_SEARCH.to_string()),
                ("skipExplanation", "false".to_string()),
            ],
        )
    }

    fn with_params(url: &str, params: &[(&str, String)]) -> Result<String> {
        Url::parse_with_params(url, params)
            .map(String::from)
            .map_err(|e| Error::Config {
                key: "api base url".into(),
                message: format!("{url}: {e}"),
            })
    }
}
