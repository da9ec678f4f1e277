use futures::future::join_all;
use tracing::{debug, warn};

use crate::model::{ContentFacets, PodcastUpload, Post, PostKind, RawPost};
use crate::parse::{extract_blocking, Extraction};
use crate::request::Fetcher;
use crate::Error;

type TranscriptionRule = fn(&PodcastUpload) -> Option<&str>;

/// Where a podcast's transcription url may live, best first.
const TRANSCRIPTION_RULES: &[TranscriptionRule] = &[
    |upload| upload.transcription.as_ref()?.cdn_url.as_deref(),
    |upload| upload.transcription.as_ref()?.transcript_url.as_deref(),
];

pub fn transcription_url(upload: &PodcastUpload) -> Option<String> {
    TRANSCRIPTION_RULES
        .iter()
        .filter_map(|rule| rule(upload))
        .find(|url| !url.is_empty())
        .map(str::to_string)
}

/// What happened when we went after a newsletter's body.
#[derive(Debug)]
pub enum ContentOutcome {
    Extracted(ContentFacets),
    NoContentRegion,
    Unavailable(Error),
}

impl ContentOutcome {
    pub fn into_facets(self) -> ContentFacets {
        match self {
            ContentOutcome::Extracted(facets) => facets,
            ContentOutcome::NoContentRegion | ContentOutcome::Unavailable(_) => {
                ContentFacets::default()
            }
        }
    }
}

/// Maps raw upstream posts into [`Post`]s, pulling newsletter bodies on the way.
#[derive(Clone)]
pub struct Enricher {
    fetcher: Fetcher,
}

impl Enricher {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Enriches every post on a page concurrently. Output keeps page order.
    pub async fn enrich_page(&self, posts: Vec<RawPost>, user_id: u64, query: &str) -> Vec<Post> {
        join_all(
            posts
                .into_iter()
                .map(|raw| self.enrich(raw, user_id, query)),
        )
        .await
    }

    pub async fn enrich(&self, raw: RawPost, user_id: u64, query: &str) -> Post {
        debug!(post_id = raw.id, user_id, "enriching post");
        let kind = PostKind::from(raw.kind.clone().unwrap_or_default());

        let mut post = Post {
            id: raw.id,
            user_id,
            title: raw.title,
            kind: kind.clone(),
            slug: raw.slug,
            post_date: raw.post_date,
            audience: raw.audience,
            url: raw.canonical_url,
            likes: raw.reaction_count.unwrap_or(0),
            comments: raw.comment_count.unwrap_or(0),
            keyword: query.to_string(),
            podcast_transcription_url: None,
            newsletter: None,
        };

        match kind {
            PostKind::Podcast => {
                post.podcast_transcription_url =
                    raw.podcast_upload.as_ref().and_then(transcription_url);
            }
            PostKind::Newsletter => {
                let outcome = self.newsletter_content(post.url.as_deref()).await;
                match &outcome {
                    ContentOutcome::Extracted(_) => {}
                    ContentOutcome::NoContentRegion => {
                        debug!(post_id = post.id, url = ?post.url, "newsletter has no content region");
                    }
                    ContentOutcome::Unavailable(e) => {
                        warn!(post_id = post.id, url = ?post.url, error = %e, "Couldn't fetch newsletter content");
                    }
                }
                post.newsletter = Some(outcome.into_facets().into());
            }
            PostKind::Other(_) => {}
        }

        post
    }

    pub async fn newsletter_content(&self, url: Option<&str>) -> ContentOutcome {
        let Some(url) = url else {
            return ContentOutcome::Unavailable(Error::Transient {
                url: String::new(),
                message: "post has no canonical url".into(),
            });
        };

        let html = match self.fetcher.fetch_text(url).await {
            Ok(html) => html,
            Err(e) => return ContentOutcome::Unavailable(e),
        };
        match extract_blocking(html).await {
            Ok(Extraction::Found(facets)) => ContentOutcome::Extracted(facets),
            Ok(Extraction::NoContentRegion) => ContentOutcome::NoContentRegion,
            Err(e) => ContentOutcome::Unavailable(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transcription;

    fn upload(cdn: Option<&str>, transcript: Option<&str>) -> PodcastUpload {
        PodcastUpload {
            transcription: Some(Transcription {
                cdn_url: cdn.map(Into::into),
                transcript_url: transcript.map(Into::into),
            }),
        }
    }

    #[test]
    fn cdn_url_wins_over_transcript_url() {
        let url = transcription_url(&upload(Some("https://cdn/x"), Some("https://t/x")));
        assert_eq!(url.as_deref(), Some("https://cdn/x"));
    }

    #[test]
    fn falls_back_to_transcript_url() {
        assert_eq!(
            transcription_url(&upload(None, Some("https://t/x"))).as_deref(),
            Some("https://t/x")
        );
        assert_eq!(
            transcription_url(&upload(Some(""), Some("https://t/x"))).as_deref(),
            Some("https://t/x")
        );
    }

    #[test]
    fn no_transcription_is_none() {
        assert_eq!(transcription_url(&PodcastUpload::default()), None);
        assert_eq!(transcription_url(&upload(None, None)), None);
    }
}
