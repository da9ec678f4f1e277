use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{error, info, warn};

use crate::collect::Accumulator;
use crate::model::{Post, Publication};
use crate::{Error, Result};

/// The three artifacts written for every query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Publications,
    LatestPosts,
    PopularPosts,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [
        Artifact::Publications,
        Artifact::LatestPosts,
        Artifact::PopularPosts,
    ];

    fn label(self) -> &'static str {
        match self {
            Artifact::Publications => "publications",
            Artifact::LatestPosts => "latest posts",
            Artifact::PopularPosts => "popular posts",
        }
    }

    pub fn file_name(self, query: &str) -> String {
        let suffix = match self {
            Artifact::Publications => "user_profiles_from_publications",
            Artifact::LatestPosts => "all_users_latest_posts",
            Artifact::PopularPosts => "all_users_popular_posts",
        };
        format!("{query}_{suffix}.json")
    }

    pub fn path(self, dir: &Path, query: &str) -> PathBuf {
        dir.join(self.file_name(query))
    }
}

/// Writes `items` as a pretty-printed JSON array, replacing whatever was there.
pub async fn write_snapshot<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(items).map_err(|e| persistence(path, e))?;
    let mut file = File::create(path).await.map_err(|e| persistence(path, e))?;
    file.write_all(&bytes).await.map_err(|e| persistence(path, e))?;
    file.flush().await.map_err(|e| persistence(path, e))?;
    info!(path = %path.display(), count = items.len(), "Data saved");
    Ok(())
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Persistence {
        target: path.display().to_string(),
        message: e.to_string(),
    }
}

pub async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Downstream table store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_publications(&self, rows: &[Publication]) -> Result<()>;
    /// Must be idempotent on `Post::id`.
    async fn upsert_posts(&self, rows: &[Post]) -> Result<()>;
}

/// PostgREST style store (`/rest/v1/{table}`).
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn post_rows<T: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[T],
        upsert_on: Option<&str>,
    ) -> Result<()> {
        let mut url = format!("{}/rest/v1/{table}", self.base_url);
        if let Some(column) = upsert_on {
            url.push_str(&format!("?on_conflict={column}"));
        }

        let mut req = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(rows);
        if upsert_on.is_some() {
            req = req.header("Prefer", "resolution=merge-duplicates");
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Persistence {
                target: table.to_string(),
                message: format!("status {status}: {body}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for RestStore {
    async fn insert_publications(&self, rows: &[Publication]) -> Result<()> {
        self.post_rows("users", rows, None).await
    }

    async fn upsert_posts(&self, rows: &[Post]) -> Result<()> {
        self.post_rows("posts", rows, Some("id")).await
    }
}

/// Outcome of loading one query's artifacts into a [`Store`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub publications: usize,
    pub latest_posts: usize,
    pub popular_posts: usize,
    pub errors: Vec<String>,
}

impl LoadReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Drops posts whose id was already seen, keeping the first.
pub fn dedup_posts(posts: Vec<Post>) -> Vec<Post> {
    let mut acc = Accumulator::default();
    acc.merge(posts);
    acc.into_vec()
}

/// Reads the artifacts written for `query` back from `dir` and loads them.
/// Only the artifacts in `written` are loaded; a file left over from an
/// earlier run is never picked up. Failures are recorded in the report, never returned.
pub async fn load_artifacts(
    store: &dyn Store,
    dir: &Path,
    query: &str,
    written: &[Artifact],
) -> LoadReport {
    let mut report = LoadReport::default();

    for artifact in Artifact::ALL {
        let label = artifact.label();
        if !written.contains(&artifact) {
            warn!(query, label, "Artifact wasn't written this run, not loading it");
            report.errors.push(format!("{label}: not written this run"));
            continue;
        }

        let path = artifact.path(dir, query);
        let loaded = match artifact {
            Artifact::Publications => load_publications(store, &path).await,
            Artifact::LatestPosts | Artifact::PopularPosts => load_posts(store, &path).await,
        };
        match loaded {
            Ok(count) => match artifact {
                Artifact::Publications => report.publications = count,
                Artifact::LatestPosts => report.latest_posts = count,
                Artifact::PopularPosts => report.popular_posts = count,
            },
            Err(e) => {
                error!(query, label, error = %e, "Error loading artifact");
                report.errors.push(format!("{label}: {e}"));
            }
        }
    }

    report
}

async fn load_publications(store: &dyn Store, path: &Path) -> Result<usize> {
    let rows: Vec<Publication> = read_snapshot(path).await?;
    info!(count = rows.len(), "Inserting publications");
    store.insert_publications(&rows).await?;
    Ok(rows.len())
}

async fn load_posts(store: &dyn Store, path: &Path) -> Result<usize> {
    let rows = dedup_posts(read_snapshot::<Post>(path).await?);
    info!(path = %path.display(), count = rows.len(), "Upserting posts");
    store.upsert_posts(&rows).await?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_follow_the_query() {
        assert_eq!(
            Artifact::Publications.file_name("growth"),
            "growth_user_profiles_from_publications.json"
        );
        assert_eq!(
            Artifact::LatestPosts.file_name("growth"),
            "growth_all_users_latest_posts.json"
        );
        assert_eq!(
            Artifact::PopularPosts.file_name("growth"),
            "growth_all_users_popular_posts.json"
        );
    }

    #[tokio::test]
    async fn snapshots_are_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_snapshot(&path, &[1, 2, 3]).await.unwrap();
        write_snapshot(&path, &[4]).await.unwrap();
        let back: Vec<u32> = read_snapshot(&path).await.unwrap();
        assert_eq!(back, [4]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'), "expected pretty output: {text}");
    }

    #[tokio::test]
    async fn unwritable_path_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.json");
        let err = write_snapshot(&path, &[1]).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
    }
}
