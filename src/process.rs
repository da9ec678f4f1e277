use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::Endpoints;
use crate::collect::{Collected, Collector};
use crate::config::Config;
use crate::persist::{load_artifacts, write_snapshot, Artifact, LoadReport, RestStore, Store};
use crate::request::{Direct, Fetcher, HttpTransport, ProxySource, RotatingProxies, Transport};
use crate::{info_time, Result};

/// Record of one phase for one query term.
#[derive(Debug)]
pub struct PhaseReport {
    pub artifact: Artifact,
    pub collected: usize,
    pub failed_units: usize,
    pub degraded_units: usize,
    /// The fetch error that cut the phase short, if any.
    pub aborted: Option<String>,
    pub persisted: std::result::Result<PathBuf, String>,
}

impl PhaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed_units == 0 && self.aborted.is_none() && self.persisted.is_ok()
    }
}

#[derive(Debug)]
pub struct QueryReport {
    pub query: String,
    pub publications: PhaseReport,
    pub latest: PhaseReport,
    pub popular: PhaseReport,
    pub load: Option<LoadReport>,
}

impl QueryReport {
    pub fn phases(&self) -> [&PhaseReport; 3] {
        [&self.publications, &self.latest, &self.popular]
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub queries: Vec<QueryReport>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.queries.iter().any(|q| {
            q.phases().iter().any(|p| !p.is_clean())
                || q.load.as_ref().is_some_and(LoadReport::has_errors)
        })
    }
}

/// Sequences the three collection phases per query term and writes their artifacts.
pub struct Harvester {
    collector: Collector,
    output_dir: PathBuf,
    store: Option<Arc<dyn Store>>,
}

impl Harvester {
    pub fn new(collector: Collector, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            collector,
            output_dir: output_dir.into(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wires up the real HTTP transport, proxies and store from `config`.
    pub fn from_config(config: &Config) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.request_timeout));
        let proxies: Arc<dyn ProxySource> = if config.proxy_urls.is_empty() {
            Arc::new(Direct)
        } else {
            Arc::new(RotatingProxies::new(config.proxy_urls.clone()))
        };
        let fetcher = Fetcher::new(transport, proxies, config.retry);
        let collector = Collector::new(
            fetcher,
            Endpoints::new(config.api_base.clone()),
            config.collector,
        );

        let harvester = Self::new(collector, config.output_dir.clone());
        match &config.store {
            Some(store) => harvester.with_store(Arc::new(RestStore::new(&store.url, &store.key))),
            None => harvester,
        }
    }

    /// Runs every query term, one after another.
    pub async fn run(&self, queries: &[String]) -> Result<RunReport> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut report = RunReport::default();
        for query in queries {
            report.queries.push(self.run_query(query).await);
        }
        Ok(report)
    }

    pub async fn run_query(&self, query: &str) -> QueryReport {
        let start_time = Local::now();
        info!(query, "Starting to scrape publication data");

        let publications = self.collector.search_publications(query).await;
        let user_ids: Vec<u64> = publications.items.iter().map(|p| p.id).collect();
        let publications = self
            .finish_phase(query, Artifact::Publications, publications)
            .await;

        let latest = self.collector.latest_posts(&user_ids, query).await;
        let latest = self.finish_phase(query, Artifact::LatestPosts, latest).await;

        let popular = self.collector.popular_posts(&user_ids, query).await;
        let popular = self.finish_phase(query, Artifact::PopularPosts, popular).await;

        let load = match &self.store {
            Some(store) => {
                let written: Vec<Artifact> = [&publications, &latest, &popular]
                    .into_iter()
                    .filter(|phase| phase.persisted.is_ok())
                    .map(|phase| phase.artifact)
                    .collect();
                let load = load_artifacts(store.as_ref(), &self.output_dir, query, &written).await;
                if load.has_errors() {
                    error!(query, errors = load.errors.len(), "Data insertion completed with some errors");
                } else {
                    info!(query, "All data inserted successfully");
                }
                Some(load)
            }
            None => None,
        };

        info_time!(start_time, "Finished query {:?}", query);
        QueryReport {
            query: query.to_string(),
            publications,
            latest,
            popular,
            load,
        }
    }

    async fn finish_phase<T: Serialize>(
        &self,
        query: &str,
        artifact: Artifact,
        collected: Collected<T>,
    ) -> PhaseReport {
        if let Some(e) = &collected.aborted {
            warn!(query, ?artifact, error = %e, "Phase stopped early");
        }

        let path = artifact.path(&self.output_dir, query);
        let persisted = persist(&path, &collected.items).await;

        PhaseReport {
            artifact,
            collected: collected.items.len(),
            failed_units: collected.failed_units,
            degraded_units: collected.degraded_units,
            aborted: collected.aborted.map(|e| e.to_string()),
            persisted,
        }
    }
}

async fn persist<T: Serialize>(path: &Path, items: &[T]) -> std::result::Result<PathBuf, String> {
    match write_snapshot(path, items).await {
        Ok(()) => Ok(path.to_path_buf()),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Couldn't write artifact");
            Err(e.to_string())
        }
    }
}
