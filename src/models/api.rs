//! Remote content API schema
//!
//! Typed models for the booru-style search endpoint. Responses are
//! validated at the boundary: anything that does not match this schema is
//! rejected with a `Schema` error instead of leaking loosely-typed JSON
//! into the rest of the crate.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Content rating classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Safe,
    Questionable,
    Explicit,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Safe => "s",
            Rating::Questionable => "q",
            Rating::Explicit => "e",
        }
    }
}

/// File type filter for posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Jpg,
    Png,
    Gif,
    Webm,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Jpg => "jpg",
            FileType::Png => "png",
            FileType::Gif => "gif",
            FileType::Webm => "webm",
        }
    }
}

/// Sort criteria for posts. `*Asc` variants reverse the default order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Id,
    Random,
    Score,
    ScoreAsc,
    Favcount,
    FavcountAsc,
    Tagcount,
    TagcountAsc,
    CommentCount,
    CommentCountAsc,
    Mpixels,
    MpixelsAsc,
    Filesize,
    FilesizeAsc,
    Landscape,
    Portrait,
    Duration,
    DurationAsc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Id => "id",
            SortOrder::Random => "random",
            SortOrder::Score => "score",
            SortOrder::ScoreAsc => "score_asc",
            SortOrder::Favcount => "favcount",
            SortOrder::FavcountAsc => "favcount_asc",
            SortOrder::Tagcount => "tagcount",
            SortOrder::TagcountAsc => "tagcount_asc",
            SortOrder::CommentCount => "comment_count",
            SortOrder::CommentCountAsc => "comment_count_asc",
            SortOrder::Mpixels => "mpixels",
            SortOrder::MpixelsAsc => "mpixels_asc",
            SortOrder::Filesize => "filesize",
            SortOrder::FilesizeAsc => "filesize_asc",
            SortOrder::Landscape => "landscape",
            SortOrder::Portrait => "portrait",
            SortOrder::Duration => "duration",
            SortOrder::DurationAsc => "duration_asc",
        }
    }
}

/// Simple time-window filter for posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Day,
    Week,
    Month,
    Year,
    Decade,
}

impl DateRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::Day => "day",
            DateRange::Week => "week",
            DateRange::Month => "month",
            DateRange::Year => "year",
            DateRange::Decade => "decade",
        }
    }
}

/// Search parameters for the posts endpoint.
///
/// Filters are folded into the single `tags` query parameter the API
/// expects (`rating:s order:score date:week ...`).
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub tags: Vec<String>,
    pub rating: Option<Rating>,
    pub file_type: Option<FileType>,
    pub sort_order: Option<SortOrder>,
    pub date_range: Option<DateRange>,
}

impl SearchQuery {
    /// Build the combined tag string for the request.
    pub fn build_tags(&self) -> String {
        let mut tags = self.tags.clone();
        if let Some(rating) = self.rating {
            tags.push(format!("rating:{}", rating.as_str()));
        }
        if let Some(file_type) = self.file_type {
            tags.push(format!("type:{}", file_type.as_str()));
        }
        if let Some(order) = self.sort_order {
            tags.push(format!("order:{}", order.as_str()));
        }
        if let Some(range) = self.date_range {
            tags.push(format!("date:{}", range.as_str()));
        }
        tags.join(" ").trim().to_string()
    }
}

/// Technical details of a post's media file.
#[derive(Debug, Clone, Deserialize)]
pub struct PostFile {
    /// File size in bytes.
    pub size: u64,
    /// MD5 digest assigned by the remote service.
    #[serde(rename = "md5")]
    pub hash: String,
    /// Direct download URL. Absent for withheld content.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "ext")]
    pub extension: String,
}

/// A lower-resolution variant (sample or preview) of a post.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaVariant {
    #[serde(default)]
    pub url: Option<String>,
}

/// One media post from the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: u64,
    pub file: PostFile,
    #[serde(default)]
    pub sample: Option<MediaVariant>,
    #[serde(default)]
    pub preview: Option<MediaVariant>,
    pub rating: String,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Post {
    pub fn sample_url(&self) -> Option<&str> {
        self.sample.as_ref().and_then(|v| v.url.as_deref())
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview.as_ref().and_then(|v| v.url.as_deref())
    }
}

/// Envelope returned by the posts endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tags_combines_filters() {
        let query = SearchQuery {
            tags: vec!["animal".to_string(), "nature".to_string()],
            rating: Some(Rating::Safe),
            file_type: Some(FileType::Webm),
            sort_order: Some(SortOrder::Score),
            date_range: Some(DateRange::Week),
        };
        assert_eq!(
            query.build_tags(),
            "animal nature rating:s type:webm order:score date:week"
        );
    }

    #[test]
    fn test_build_tags_empty_query() {
        assert_eq!(SearchQuery::default().build_tags(), "");
    }

    #[test]
    fn test_posts_response_parses_minimal_post() {
        let raw = r#"{
            "posts": [{
                "id": 42,
                "file": {"size": 123, "md5": "abc", "url": null, "ext": "png"},
                "sample": {"url": "https://cdn.example/s.png"},
                "rating": "s"
            }]
        }"#;
        let parsed: PostsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.posts.len(), 1);
        let post = &parsed.posts[0];
        assert_eq!(post.id, 42);
        assert_eq!(post.file.extension, "png");
        assert!(post.file.url.is_none());
        assert_eq!(post.sample_url(), Some("https://cdn.example/s.png"));
        assert!(post.preview_url().is_none());
        assert!(post.tags.is_empty());
    }

    #[test]
    fn test_posts_response_rejects_missing_file() {
        let raw = r#"{"posts": [{"id": 1, "rating": "s"}]}"#;
        assert!(serde_json::from_str::<PostsResponse>(raw).is_err());
    }
}
