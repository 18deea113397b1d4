use chrono::{DateTime, Utc};

use crate::data::UrlResolver;
use crate::feed::FeedState;
use crate::models::{CategorySummary, Comment, ImageRecord};

pub const DEFAULT_PLACEHOLDER_COLOR: &str = "#3b82f6";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub placeholder_color: String,
    pub uncategorized_label: String,
    pub missing_description_label: String,
    pub no_tags_label: String,
    pub no_comments_label: String,
    pub anonymous_author_label: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            placeholder_color: DEFAULT_PLACEHOLDER_COLOR.into(),
            uncategorized_label: "Uncategorized".into(),
            missing_description_label: "No description".into(),
            no_tags_label: "No tags".into(),
            no_comments_label: "No comments yet".into(),
            anonymous_author_label: "User".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCard {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub category_name: String,
    pub category_color: String,
    pub view_count: i64,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyState {
    /// The feed query matched nothing.
    NoMatches,
    /// The signed-in user has not uploaded anything yet.
    NoUploads,
}

impl EmptyState {
    pub fn headline(&self) -> &'static str {
        "No images"
    }

    pub fn hint(&self) -> &'static str {
        match self {
            EmptyState::NoMatches => "No images matched your search.",
            EmptyState::NoUploads => "Upload your first image to get started.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCard {
    Image(ImageCard),
    Empty(EmptyState),
}

pub fn render(
    state: &FeedState,
    urls: &dyn UrlResolver,
    options: &RenderOptions,
) -> Vec<DisplayCard> {
    render_records(state.records(), urls, options, EmptyState::NoMatches)
}

pub fn render_records(
    records: &[ImageRecord],
    urls: &dyn UrlResolver,
    options: &RenderOptions,
    empty: EmptyState,
) -> Vec<DisplayCard> {
    if records.is_empty() {
        return vec![DisplayCard::Empty(empty)];
    }
    records
        .iter()
        .map(|record| DisplayCard::Image(image_card(record, urls, options)))
        .collect()
}

pub fn image_card(record: &ImageRecord, urls: &dyn UrlResolver, options: &RenderOptions) -> ImageCard {
    let (category_name, category_color) = match &record.category {
        Some(category) => (
            category.name.clone(),
            category
                .color
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| options.placeholder_color.clone()),
        ),
        None => (
            options.uncategorized_label.clone(),
            options.placeholder_color.clone(),
        ),
    };
    let description = record
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(&options.missing_description_label)
        .to_string();
    ImageCard {
        id: record.id.clone(),
        title: record.title.clone(),
        description,
        image_url: urls.public_url(&record.file_path),
        category_name,
        category_color,
        view_count: record.view_count,
        download_count: record.download_count,
        created_at: record.created_at,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCard {
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailView {
    pub card: ImageCard,
    pub owner: Option<String>,
    pub share_url: String,
    pub tags: Vec<String>,
    /// Set when there are no tags.
    pub tags_empty: Option<String>,
    pub comments: Vec<CommentCard>,
    /// Set when there are no comments.
    pub comments_empty: Option<String>,
}

/// Extra detail data loaded alongside the image row.
#[derive(Debug, Clone, Default)]
pub struct DetailExtras<'a> {
    pub tags: &'a [String],
    pub comments: &'a [Comment],
}

/// Detail for an image whose view was just recorded: the displayed view count
/// includes that view.
pub fn render_detail(
    record: &ImageRecord,
    extras: DetailExtras<'_>,
    urls: &dyn UrlResolver,
    options: &RenderOptions,
    site_url: &str,
) -> DetailView {
    let mut card = image_card(record, urls, options);
    card.view_count += 1;
    let tags: Vec<String> = extras
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let comments: Vec<CommentCard> = extras
        .comments
        .iter()
        .map(|c| CommentCard {
            author: c
                .author
                .as_ref()
                .and_then(|a| a.email.clone())
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| options.anonymous_author_label.clone()),
            content: c.content.clone(),
            created_at: c.created_at,
        })
        .collect();
    DetailView {
        owner: record.owner.as_ref().and_then(|o| o.email.clone()),
        share_url: share_url(site_url, &record.id),
        card,
        tags_empty: tags.is_empty().then(|| options.no_tags_label.clone()),
        comments_empty: comments
            .is_empty()
            .then(|| options.no_comments_label.clone()),
        tags,
        comments,
    }
}

pub fn share_url(site_url: &str, image_id: &str) -> String {
    let base = site_url.trim_end_matches(['/', '?']);
    format!("{}/?image={}", base, image_id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GalleryStats {
    pub images: usize,
    pub views: i64,
    pub downloads: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gallery {
    pub stats: GalleryStats,
    pub cards: Vec<DisplayCard>,
}

pub fn render_gallery(
    records: &[ImageRecord],
    urls: &dyn UrlResolver,
    options: &RenderOptions,
) -> Gallery {
    let stats = GalleryStats {
        images: records.len(),
        views: records.iter().map(|r| r.view_count).sum(),
        downloads: records.iter().map(|r| r.download_count).sum(),
    };
    Gallery {
        stats,
        cards: render_records(records, urls, options, EmptyState::NoUploads),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub color: String,
    pub image_count: i64,
}

pub fn render_categories(summaries: &[CategorySummary], options: &RenderOptions) -> Vec<CategoryCard> {
    summaries
        .iter()
        .map(|s| CategoryCard {
            id: s.category.id.clone(),
            name: s.category.name.clone(),
            description: s.category.description.clone(),
            color: if s.category.color.trim().is_empty() {
                options.placeholder_color.clone()
            } else {
                s.category.color.clone()
            },
            image_count: s.image_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample_record;
    use crate::models::{Category, CategoryRef};

    struct TestUrls;

    impl UrlResolver for TestUrls {
        fn public_url(&self, file_path: &str) -> String {
            format!("https://cdn.test/{file_path}")
        }
    }

    #[test]
    fn empty_feed_renders_single_marker() {
        let cards = render(&FeedState::default(), &TestUrls, &RenderOptions::default());
        assert_eq!(cards, vec![DisplayCard::Empty(EmptyState::NoMatches)]);
    }

    #[test]
    fn uncategorized_uses_placeholder() {
        let card = image_card(&sample_record("a"), &TestUrls, &RenderOptions::default());
        assert_eq!(card.category_name, "Uncategorized");
        assert_eq!(card.category_color, DEFAULT_PLACEHOLDER_COLOR);
        assert_eq!(card.description, "No description");
        assert_eq!(card.image_url, "https://cdn.test/u1/a.jpg");
    }

    #[test]
    fn category_and_counters_copied() {
        let mut record = sample_record("a");
        record.category = Some(CategoryRef {
            name: "Food".into(),
            color: Some("#EF4444".into()),
        });
        record.view_count = 41;
        record.download_count = 3;
        record.description = Some("  ramen  ".into());
        let card = image_card(&record, &TestUrls, &RenderOptions::default());
        assert_eq!(card.category_name, "Food");
        assert_eq!(card.category_color, "#EF4444");
        assert_eq!(card.view_count, 41);
        assert_eq!(card.download_count, 3);
        assert_eq!(card.description, "ramen");
    }

    #[test]
    fn detail_counts_the_recorded_view() {
        let mut record = sample_record("a");
        record.view_count = 9;
        let detail = render_detail(
            &record,
            DetailExtras::default(),
            &TestUrls,
            &RenderOptions::default(),
            "https://pics.test/",
        );
        assert_eq!(detail.card.view_count, 10);
        assert_eq!(detail.share_url, "https://pics.test/?image=a");
        assert_eq!(detail.tags_empty.as_deref(), Some("No tags"));
        assert_eq!(detail.comments_empty.as_deref(), Some("No comments yet"));
    }

    #[test]
    fn detail_lists_tags_and_comment_authors() {
        use crate::models::OwnerRef;
        use chrono::TimeZone;

        let tags = vec!["sunset".to_string(), "  ".to_string()];
        let comments = vec![
            Comment {
                id: "k1".into(),
                content: "lovely".into(),
                created_at: Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(),
                author: Some(OwnerRef {
                    email: Some("ana@example.com".into()),
                }),
            },
            Comment {
                id: "k2".into(),
                content: "nice".into(),
                created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
                author: None,
            },
        ];
        let detail = render_detail(
            &sample_record("a"),
            DetailExtras {
                tags: &tags,
                comments: &comments,
            },
            &TestUrls,
            &RenderOptions::default(),
            "https://pics.test",
        );
        assert_eq!(detail.tags, vec!["sunset"]);
        assert!(detail.tags_empty.is_none());
        assert_eq!(detail.comments[0].author, "ana@example.com");
        assert_eq!(detail.comments[1].author, "User");
        assert!(detail.comments_empty.is_none());
    }

    #[test]
    fn gallery_totals() {
        let mut a = sample_record("a");
        a.view_count = 5;
        a.download_count = 1;
        let mut b = sample_record("b");
        b.view_count = 7;
        b.download_count = 2;
        let gallery = render_gallery(&[a, b], &TestUrls, &RenderOptions::default());
        assert_eq!(
            gallery.stats,
            GalleryStats {
                images: 2,
                views: 12,
                downloads: 3
            }
        );

        let empty = render_gallery(&[], &TestUrls, &RenderOptions::default());
        assert_eq!(empty.cards, vec![DisplayCard::Empty(EmptyState::NoUploads)]);
    }

    #[test]
    fn category_cards_fill_missing_color() {
        let summaries = vec![CategorySummary {
            category: Category {
                id: "c1".into(),
                name: "Misc".into(),
                description: "Everything else".into(),
                color: String::new(),
            },
            image_count: 4,
        }];
        let cards = render_categories(&summaries, &RenderOptions::default());
        assert_eq!(cards[0].color, DEFAULT_PLACEHOLDER_COLOR);
        assert_eq!(cards[0].image_count, 4);
    }
}
