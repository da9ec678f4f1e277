//! Normalized entities written to the artifacts, and the raw upstream shapes
//! they are mapped from.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Anything the collector can deduplicate.
pub trait Identified {
    fn id(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub subscribers: u64,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub author_photo_url: Option<String>,
    pub author_bio: Option<String>,
    pub twitter_screen_name: Option<String>,
}

impl Identified for Publication {
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PostKind {
    Podcast,
    Newsletter,
    /// Any other upstream type, kept verbatim.
    Other(String),
}

impl From<String> for PostKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "podcast" => PostKind::Podcast,
            "newsletter" => PostKind::Newsletter,
            _ => PostKind::Other(value),
        }
    }
}

impl From<PostKind> for String {
    fn from(value: PostKind) -> Self {
        match value {
            PostKind::Podcast => "podcast".to_string(),
            PostKind::Newsletter => "newsletter".to_string(),
            PostKind::Other(s) => s,
        }
    }
}

/// Facets pulled out of a newsletter's content region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFacets {
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub links: Vec<String>,
}

impl ContentFacets {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
            && self.images.is_empty()
            && self.videos.is_empty()
            && self.links.is_empty()
    }
}

/// Newsletter payload as it appears on a serialized [`Post`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterContent {
    pub newsletter_text: String,
    pub newsletter_images: Vec<String>,
    pub newsletter_videos: Vec<String>,
    pub newsletter_links: Vec<String>,
}

impl From<ContentFacets> for NewsletterContent {
    fn from(facets: ContentFacets) -> Self {
        Self {
            newsletter_text: facets.texts.join(" "),
            newsletter_images: facets.images,
            newsletter_videos: facets.videos,
            newsletter_links: facets.links,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub user_id: u64,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub slug: Option<String>,
    pub post_date: Option<String>,
    pub audience: Option<String>,
    pub url: Option<String>,
    pub likes: u64,
    pub comments: u64,
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_transcription_url: Option<String>,
    #[serde(flatten)]
    pub newsletter: Option<NewsletterContent>,
}

impl Identified for Post {
    fn id(&self) -> u64 {
        self.id
    }
}

// Upstream shapes.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostsPage {
    #[serde(default, deserialize_with = "skip_malformed_posts")]
    pub posts: Vec<RawPost>,
}

/// A post that doesn't fit [`RawPost`] is dropped on its own instead of
/// failing the whole page.
fn skip_malformed_posts<'de, D>(deserializer: D) -> Result<Vec<RawPost>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawPost>(value) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!(error = %e, "Skipping malformed post");
                None
            }
        })
        .collect())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPost {
    pub id: u64,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub slug: Option<String>,
    pub post_date: Option<String>,
    pub audience: Option<String>,
    pub canonical_url: Option<String>,
    pub reaction_count: Option<u64>,
    pub comment_count: Option<u64>,
    #[serde(rename = "podcastUpload")]
    pub podcast_upload: Option<PodcastUpload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodcastUpload {
    pub transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    pub cdn_url: Option<String>,
    pub transcript_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    pub results: Option<Vec<SearchResult>>,
    pub more: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    pub author_id: Option<u64>,
    pub copyright: Option<String>,
    pub bio: Option<String>,
    pub base_url: Option<String>,
    /// Usually a string like `"12,345"`, occasionally a bare number.
    #[serde(rename = "freeSubscriberCount")]
    pub free_subscriber_count: Option<serde_json::Value>,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub author_photo_url: Option<String>,
    pub author_bio: Option<String>,
    pub twitter_screen_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(kind: PostKind) -> Post {
        Post {
            id: 1,
            user_id: 2,
            title: Some("t".into()),
            kind,
            slug: None,
            post_date: None,
            audience: None,
            url: None,
            likes: 3,
            comments: 0,
            keyword: "growth".into(),
            podcast_transcription_url: None,
            newsletter: None,
        }
    }

    #[test]
    fn unknown_post_types_survive_serialization() {
        let json = serde_json::to_value(post(PostKind::Other("thread".into()))).unwrap();
        assert_eq!(json["type"], "thread");
        assert!(json.get("newsletter_text").is_none());
        assert!(json.get("podcast_transcription_url").is_none());
    }

    #[test]
    fn newsletter_fields_are_flattened() {
        let mut p = post(PostKind::Newsletter);
        p.newsletter = Some(
            ContentFacets {
                texts: vec!["a".into(), "b".into()],
                ..Default::default()
            }
            .into(),
        );
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["newsletter_text"], "a b");
        assert_eq!(json["newsletter_images"], serde_json::json!([]));

        let back: Post = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn malformed_posts_are_dropped_from_the_page() {
        let page: PostsPage = serde_json::from_str(
            r#"{"posts": [
                {"id": 1, "title": "kept"},
                {"id": null, "title": "no id"},
                {"title": "missing id"},
                {"id": 2, "reaction_count": "lots"},
                {"id": 3}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<u64> = page.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, [1, 3]);

        let empty: PostsPage = serde_json::from_str(r#"{"posts": null}"#).unwrap();
        assert!(empty.posts.is_empty());
        let missing: PostsPage = serde_json::from_str("{}").unwrap();
        assert!(missing.posts.is_empty());
    }
}
