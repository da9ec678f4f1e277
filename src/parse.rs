use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;

use crate::model::ContentFacets;
use crate::{Error, Result, CONTENT_REGION_SELECTOR};

/// Result of looking for the content region in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Found(ContentFacets),
    /// The document parsed but has no content region. Not an error.
    NoContentRegion,
}

impl Extraction {
    pub fn into_facets(self) -> ContentFacets {
        match self {
            Extraction::Found(facets) => facets,
            Extraction::NoContentRegion => ContentFacets::default(),
        }
    }
}

/// Extracts facets from `html`, returning empty facets when there is no content region.
pub fn extract(html: &str) -> Result<ContentFacets> {
    extract_facets(html).map(Extraction::into_facets)
}

/// Parses the document and collects texts, images, media and links from the
/// first content region, all in document order.
///
/// Malformed markup is never an error, the parser recovers what it can.
/// `Err` only comes from a selector that fails to compile.
pub fn extract_facets(html: &str) -> Result<Extraction> {
    let doc = Html::parse_document(html);

    let region_selector = create_selector(CONTENT_REGION_SELECTOR)?;
    let Some(region) = doc.select(&region_selector).next() else {
        return Ok(Extraction::NoContentRegion);
    };

    let p_selector = create_selector("p")?;
    let img_selector = create_selector("img")?;
    let video_selector = create_selector("video")?;
    let source_selector = create_selector("source")?;
    let a_selector = create_selector("a")?;

    let texts = region
        .select(&p_selector)
        .map(|p| p.text().collect::<String>())
        .collect();
    let images = attr_values(region, &img_selector, "src");
    // Video `src` first, then every nested <source>.
    let mut videos = attr_values(region, &video_selector, "src");
    videos.extend(attr_values(region, &source_selector, "src"));
    let links = attr_values(region, &a_selector, "href");

    Ok(Extraction::Found(ContentFacets {
        texts,
        images,
        videos,
        links,
    }))
}

/// Same as [`extract_facets`], on the blocking pool.
pub async fn extract_blocking(html: String) -> Result<Extraction> {
    spawn_blocking(move || extract_facets(&html)).await?
}

fn attr_values(region: ElementRef<'_>, selector: &Selector, attr: &str) -> Vec<String> {
    region
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}
