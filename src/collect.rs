//! Batch collection over the upstream API.
//!
//! All three strategies share one shape: a bounded batch of work units is
//! spawned onto a `JoinSet`, the batch is joined, and only then are the unit
//! outcomes merged (in work-list order) into an [`Accumulator`]. The dedup set
//! is never touched by a running unit, so it needs no lock.

use std::collections::HashSet;
use std::future::Future;

use chrono::Local;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::Endpoints;
use crate::enrich::Enricher;
use crate::model::{Identified, Post, PostsPage, Publication, SearchPage, SearchResult};
use crate::request::Fetcher;
use crate::{
    info_time, Error, Result, LATEST_PAGE_SIZE, POPULAR_MAX_RAW_POSTS, POPULAR_OFFSET_STEP,
    POPULAR_PAGE_SIZE, POPULAR_TOP_N,
};

/// Append-only result list plus the ids already in it. First seen wins.
#[derive(Debug)]
pub struct Accumulator<T> {
    items: Vec<T>,
    seen: HashSet<u64>,
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T: Identified> Accumulator<T> {
    /// Appends the items whose id hasn't been seen yet. Returns how many were kept.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = T>) -> usize {
        let before = self.items.len();
        for item in batch {
            if self.seen.insert(item.id()) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

/// What a single unit of work produced.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    Collected(Vec<T>),
    Empty,
    /// Some data came back before a fetch gave up.
    Partial { items: Vec<T>, error: Error },
    Failed(Error),
}

/// Everything one collector run produced.
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub failed_units: usize,
    pub degraded_units: usize,
    /// Set when the run stopped early because a required fetch gave up.
    pub aborted: Option<Error>,
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failed_units: 0,
            degraded_units: 0,
            aborted: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSettings {
    pub search_batch: usize,
    pub latest_batch: usize,
    pub popular_batch: usize,
    pub min_subscribers: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            search_batch: crate::DEFAULT_SEARCH_BATCH,
            latest_batch: crate::DEFAULT_LATEST_BATCH,
            popular_batch: crate::DEFAULT_POPULAR_BATCH,
            min_subscribers: crate::SUBSCRIBER_THRESHOLD,
        }
    }
}

/// Runs one batch: spawns every unit, waits for all of them, and returns the
/// outputs in work-list order. A unit whose task panicked is reported and dropped.
pub(crate) async fn run_batch<I, O, F, Fut>(work: &[I], unit: F) -> Vec<(I, O)>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
{
    let mut task_set = JoinSet::new();
    for (idx, item) in work.iter().cloned().enumerate() {
        let fut = unit(item.clone());
        task_set.spawn(async move { (idx, item, fut.await) });
    }

    let mut done = Vec::with_capacity(work.len());
    while let Some(task) = task_set.join_next().await {
        match task {
            Ok(out) => done.push(out),
            Err(e) => error!(error = %e, "work unit task failed"),
        }
    }
    done.sort_unstable_by_key(|(idx, _, _)| *idx);
    done.into_iter().map(|(_, item, out)| (item, out)).collect()
}

/// Parses a subscriber count the way the upstream formats it: thousands
/// separators dropped, then the leading integer. `None` when nothing parses.
pub fn parse_subscriber_count(raw: &serde_json::Value) -> Option<u64> {
    match raw {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => {
            let cleaned = s.replace(',', "");
            let cleaned = cleaned.trim_start();
            let digits: String = cleaned
                .strip_prefix('+')
                .unwrap_or(cleaned)
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Keeps a search result only if it is identifiable and big enough.
pub fn publication_from(result: SearchResult, min_subscribers: u64) -> Option<Publication> {
    let subscribers = result
        .free_subscriber_count
        .as_ref()
        .and_then(parse_subscriber_count)?;
    if subscribers < min_subscribers {
        return None;
    }
    let id = result.author_id?;
    Some(Publication {
        id,
        name: result.copyright,
        description: result.bio,
        url: result.base_url,
        subscribers,
        author_name: result.author_name,
        author_handle: result.author_handle,
        author_photo_url: result.author_photo_url,
        author_bio: result.author_bio,
        twitter_screen_name: result.twitter_screen_name,
    })
}

/// Ranks one profile's posts: dedup by id, most liked first, top `n`.
pub fn top_by_likes(posts: Vec<Post>, n: usize) -> Vec<Post> {
    let mut acc = Accumulator::default();
    acc.merge(posts);
    let mut posts = acc.into_vec();
    // Stable, so equal likes keep fetch order.
    posts.sort_by(|a, b| b.likes.cmp(&a.likes));
    posts.truncate(n);
    posts
}

#[derive(Clone)]
pub struct Collector {
    fetcher: Fetcher,
    enricher: Enricher,
    endpoints: Endpoints,
    settings: CollectorSettings,
}

impl Collector {
    pub fn new(fetcher: Fetcher, endpoints: Endpoints, settings: CollectorSettings) -> Self {
        Self {
            enricher: Enricher::new(fetcher.clone()),
            fetcher,
            endpoints,
            settings,
        }
    }

    /// Pages through the publication search in rounds of `search_batch`
    /// concurrent page fetches until the last page of a round says there is nothing more.
    pub async fn search_publications(&self, query: &str) -> Collected<Publication> {
        let start_time = Local::now();
        let batch = self.settings.search_batch.max(1);
        let mut acc = Accumulator::default();
        let mut out = Collected::default();
        let mut current_page = 0;
        let mut round = 0;

        loop {
            round += 1;
            let pages: Vec<usize> = (current_page..current_page + batch).collect();
            info!(query, round, first_page = current_page, "Requesting search round");

            let results = run_batch(&pages, |page| {
                let this = self.clone();
                let query = query.to_string();
                async move { this.search_page(&query, page).await }
            })
            .await;

            // Only the highest-indexed page decides whether there is another round.
            let more_pages = results
                .last()
                .and_then(|(_, res)| res.as_ref().ok())
                .and_then(|page| page.more)
                .unwrap_or(false);

            for (page_num, res) in results {
                match res {
                    Ok(page) => {
                        let Some(found) = page.results else {
                            error!(query, page = page_num, "No results found for page");
                            out.degraded_units += 1;
                            continue;
                        };
                        let publications: Vec<_> = found
                            .into_iter()
                            .filter_map(|r| publication_from(r, self.settings.min_subscribers))
                            .collect();
                        debug!(query, page = page_num, kept = publications.len(), "page filtered");
                        acc.merge(publications);
                    }
                    Err(e) => {
                        error!(query, page = page_num, error = %e, "Search page fetch failed");
                        out.failed_units += 1;
                        if out.aborted.is_none() {
                            out.aborted = Some(e);
                        }
                    }
                }
            }

            if out.aborted.is_some() || !more_pages {
                break;
            }
            current_page += batch;
        }

        info_time!(
            start_time,
            "Search for {:?} done after {} rounds: {} publications",
            query,
            round,
            acc.len()
        );
        out.items = acc.into_vec();
        out
    }

    async fn search_page(&self, query: &str, page: usize) -> Result<SearchPage> {
        debug!(query, page, "Queuing publication request");
        let url = self.endpoints.publication_search(query, page)?;
        self.fetcher.fetch_json::<SearchPage>(&url).await
    }

    /// Newest posts of every profile, one page each.
    pub async fn latest_posts(&self, user_ids: &[u64], query: &str) -> Collected<Post> {
        let this = self.clone();
        let query = query.to_string();
        self.collect_per_profile(user_ids, self.settings.latest_batch, "latest", move |id| {
            let this = this.clone();
            let query = query.clone();
            async move { this.latest_for(id, &query).await }
        })
        .await
    }

    /// Most liked posts of every profile, from up to `POPULAR_MAX_RAW_POSTS` fetched posts each.
    pub async fn popular_posts(&self, user_ids: &[u64], query: &str) -> Collected<Post> {
        let this = self.clone();
        let query = query.to_string();
        self.collect_per_profile(user_ids, self.settings.popular_batch, "popular", move |id| {
            let this = this.clone();
            let query = query.clone();
            async move { this.popular_for(id, &query).await }
        })
        .await
    }

    async fn collect_per_profile<F, Fut>(
        &self,
        user_ids: &[u64],
        batch_size: usize,
        label: &str,
        unit: F,
    ) -> Collected<Post>
    where
        F: Fn(u64) -> Fut,
        Fut: Future<Output = UnitOutcome<Post>> + Send + 'static,
    {
        let start_time = Local::now();
        let mut acc = Accumulator::default();
        let mut out = Collected::default();

        for (batch_num, batch) in user_ids.chunks(batch_size.max(1)).enumerate() {
            info!(label, batch = batch_num + 1, users = batch.len(), "Fetching posts for batch");
            for (user_id, outcome) in run_batch(batch, &unit).await {
                match outcome {
                    UnitOutcome::Collected(posts) => {
                        acc.merge(posts);
                    }
                    UnitOutcome::Empty => debug!(label, user_id, "no posts"),
                    UnitOutcome::Partial { items, error } => {
                        warn!(label, user_id, kept = items.len(), error = %error, "Partial posts for user");
                        out.degraded_units += 1;
                        acc.merge(items);
                    }
                    UnitOutcome::Failed(error) => {
                        error!(label, user_id, error = %error, "Error fetching posts for user");
                        out.failed_units += 1;
                    }
                }
            }
        }

        info_time!(
            start_time,
            "Completed {} posts for {} users: {} posts",
            label,
            user_ids.len(),
            acc.len()
        );
        out.items = acc.into_vec();
        out
    }

    async fn latest_for(&self, user_id: u64, query: &str) -> UnitOutcome<Post> {
        debug!(user_id, "Fetching latest posts");
        let page = match self.posts_page(user_id, 0, LATEST_PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => return UnitOutcome::Failed(e),
        };
        let posts = self.enricher.enrich_page(page.posts, user_id, query).await;
        if posts.is_empty() {
            UnitOutcome::Empty
        } else {
            UnitOutcome::Collected(posts)
        }
    }

    async fn popular_for(&self, user_id: u64, query: &str) -> UnitOutcome<Post> {
        debug!(user_id, "Fetching popular posts");
        let mut offset = 0;
        let mut fetched = 0;
        let mut all_posts = Vec::new();

        while fetched < POPULAR_MAX_RAW_POSTS {
            let page = match self.posts_page(user_id, offset, POPULAR_PAGE_SIZE).await {
                Ok(page) => page,
                Err(error) if all_posts.is_empty() => return UnitOutcome::Failed(error),
                Err(error) => {
                    return UnitOutcome::Partial {
                        items: top_by_likes(all_posts, POPULAR_TOP_N),
                        error,
                    }
                }
            };

            let page_len = page.posts.len();
            all_posts.extend(self.enricher.enrich_page(page.posts, user_id, query).await);
            fetched += page_len;

            if page_len < POPULAR_PAGE_SIZE {
                break;
            }
            // Pages overlap by one post; duplicates are dropped in `top_by_likes`.
            offset += POPULAR_OFFSET_STEP;
        }

        if fetched >= POPULAR_MAX_RAW_POSTS {
            debug!(user_id, fetched, "Reached the post limit");
        }
        if all_posts.is_empty() {
            UnitOutcome::Empty
        } else {
            UnitOutcome::Collected(top_by_likes(all_posts, POPULAR_TOP_N))
        }
    }

    async fn posts_page(&self, user_id: u64, offset: usize, limit: usize) -> Result<PostsPage> {
        let url = self.endpoints.profile_posts(user_id, offset, limit)?;
        self.fetcher.fetch_json::<PostsPage>(&url).await
    }
}
