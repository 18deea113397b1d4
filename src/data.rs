use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::models::{Category, CategorySummary, Comment, ImageRecord};
use crate::query::QueryDescriptor;
use crate::supabase::{self, RemoteQuery};

pub const IMAGES_TABLE: &str = "images";
pub const CATEGORIES_TABLE: &str = "categories";
pub const IMAGE_TAGS_TABLE: &str = "image_tags";
pub const COMMENTS_TABLE: &str = "comments";
pub const FEED_COLUMNS: &str = "*, categories(name, color), profiles:user_id(email)";
const SEARCH_COLUMNS: [&str; 2] = ["title", "description"];

pub trait ImageService: Send + Sync {
    fn query_images(&self, descriptor: &QueryDescriptor) -> Result<Vec<ImageRecord>>;
    fn image_detail(&self, id: &str) -> Result<ImageRecord>;
    fn record_view(&self, id: &str) -> Result<()>;
    fn record_download(&self, id: &str) -> Result<()>;
    fn user_images(&self, user_id: &str) -> Result<Vec<ImageRecord>>;
    /// Tag names attached to the image.
    fn image_tags(&self, id: &str) -> Result<Vec<String>>;
    /// Comments on the image, newest first.
    fn comments(&self, id: &str) -> Result<Vec<Comment>>;
}

pub trait CategoryService: Send + Sync {
    fn list_categories(&self) -> Result<Vec<Category>>;
    fn categories_with_counts(&self) -> Result<Vec<CategorySummary>>;
}

/// Public URL resolution for stored files.
pub trait UrlResolver {
    fn public_url(&self, file_path: &str) -> String;
}

/// Remote query for one page of the public feed.
pub fn feed_query(descriptor: &QueryDescriptor) -> RemoteQuery {
    let (from, to) = descriptor.window();
    let mut query = RemoteQuery::from(IMAGES_TABLE)
        .select(FEED_COLUMNS)
        .eq("is_public", true);
    if let Some(category) = &descriptor.category {
        query = query.eq("category_id", category);
    }
    if let Some(term) = &descriptor.search {
        query = query.ilike_any(&SEARCH_COLUMNS, term);
    }
    query = query.order(
        descriptor.sort.as_column(),
        descriptor.direction.is_ascending(),
    );
    if descriptor.sort != crate::query::SortField::CreatedAt {
        query = query.order("created_at", false);
    }
    query.range(from, to)
}

pub struct SupabaseImageService {
    client: Arc<supabase::Client>,
}

impl SupabaseImageService {
    pub fn new(client: Arc<supabase::Client>) -> Self {
        Self { client }
    }
}

impl ImageService for SupabaseImageService {
    fn query_images(&self, descriptor: &QueryDescriptor) -> Result<Vec<ImageRecord>> {
        self.client
            .select(feed_query(descriptor))
            .context("fetch image feed")
    }

    fn image_detail(&self, id: &str) -> Result<ImageRecord> {
        self.client
            .select_single(
                RemoteQuery::from(IMAGES_TABLE)
                    .select(FEED_COLUMNS)
                    .eq("id", id),
            )
            .with_context(|| format!("fetch image {id}"))
    }

    fn record_view(&self, id: &str) -> Result<()> {
        self.client
            .rpc("increment_view_count", &json!({ "image_uuid": id }))
            .context("increment view count")?;
        Ok(())
    }

    fn record_download(&self, id: &str) -> Result<()> {
        self.client
            .rpc("increment_download_count", &json!({ "image_uuid": id }))
            .context("increment download count")?;
        Ok(())
    }

    fn user_images(&self, user_id: &str) -> Result<Vec<ImageRecord>> {
        self.client
            .select(
                RemoteQuery::from(IMAGES_TABLE)
                    .select("*, categories(name, color)")
                    .eq("user_id", user_id)
                    .order("created_at", false),
            )
            .context("fetch user images")
    }

    fn image_tags(&self, id: &str) -> Result<Vec<String>> {
        let rows: Vec<TagLinkRow> = self
            .client
            .select(
                RemoteQuery::from(IMAGE_TAGS_TABLE)
                    .select("tags(name)")
                    .eq("image_id", id),
            )
            .with_context(|| format!("fetch tags for image {id}"))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.tags.map(|tag| tag.name))
            .collect())
    }

    fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.client
            .select(
                RemoteQuery::from(COMMENTS_TABLE)
                    .select("*, profiles:user_id(email)")
                    .eq("image_id", id)
                    .order("created_at", false),
            )
            .with_context(|| format!("fetch comments for image {id}"))
    }
}

#[derive(Debug, Deserialize)]
struct TagLinkRow {
    #[serde(default)]
    tags: Option<TagRow>,
}

#[derive(Debug, Deserialize)]
struct TagRow {
    name: String,
}

pub struct SupabaseCategoryService {
    client: Arc<supabase::Client>,
}

impl SupabaseCategoryService {
    pub fn new(client: Arc<supabase::Client>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct CategoryCountRow {
    #[serde(flatten)]
    category: Category,
    #[serde(default)]
    images: Vec<CountRow>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    #[serde(default)]
    count: i64,
}

impl CategoryService for SupabaseCategoryService {
    fn list_categories(&self) -> Result<Vec<Category>> {
        self.client
            .select(
                RemoteQuery::from(CATEGORIES_TABLE)
                    .select("*")
                    .order("name", true),
            )
            .context("fetch categories")
    }

    fn categories_with_counts(&self) -> Result<Vec<CategorySummary>> {
        let rows: Vec<CategoryCountRow> = self
            .client
            .select(
                RemoteQuery::from(CATEGORIES_TABLE)
                    .select("*, images(count)")
                    .order("name", true),
            )
            .context("fetch category counts")?;
        Ok(rows
            .into_iter()
            .map(|row| CategorySummary {
                image_count: row.images.first().map(|c| c.count).unwrap_or(0),
                category: row.category,
            })
            .collect())
    }
}

/// Resolves public URLs inside one storage bucket.
pub struct BucketUrls {
    client: Arc<supabase::Client>,
    bucket: String,
}

impl BucketUrls {
    pub fn new(client: Arc<supabase::Client>, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

impl UrlResolver for BucketUrls {
    fn public_url(&self, file_path: &str) -> String {
        self.client.public_url(&self.bucket, file_path)
    }
}

/// In-memory service for offline browsing and tests. Pages come from a fixed
/// record list, scripted failures are consumed first.
#[derive(Default)]
pub struct MockImageService {
    records: Vec<ImageRecord>,
    failures: Mutex<Vec<String>>,
    views: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
    queries: Mutex<Vec<QueryDescriptor>>,
    tags: HashMap<String, Vec<String>>,
    comments: HashMap<String, Vec<Comment>>,
}

impl MockImageService {
    pub fn new(records: Vec<ImageRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_tags(mut self, image_id: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            image_id.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_comments(mut self, image_id: &str, comments: Vec<Comment>) -> Self {
        self.comments.insert(image_id.to_string(), comments);
        self
    }

    pub fn fail_next(&self, message: &str) {
        self.failures.lock().push(message.to_string());
    }

    pub fn queries(&self) -> Vec<QueryDescriptor> {
        self.queries.lock().clone()
    }

    pub fn views(&self) -> Vec<String> {
        self.views.lock().clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    fn take_failure(&self) -> Result<()> {
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            return Ok(());
        }
        let message = failures.remove(0);
        anyhow::bail!(message)
    }
}

impl ImageService for MockImageService {
    fn query_images(&self, descriptor: &QueryDescriptor) -> Result<Vec<ImageRecord>> {
        self.queries.lock().push(descriptor.clone());
        self.take_failure()?;
        let (from, to) = descriptor.window();
        let needle = descriptor.search.as_ref().map(|s| s.to_lowercase());
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_public)
            .filter(|r| match &descriptor.category {
                Some(category) => r.category_id.as_deref() == Some(category.as_str()),
                None => true,
            })
            .filter(|r| match &needle {
                Some(needle) => {
                    r.title.to_lowercase().contains(needle)
                        || r
                            .description
                            .as_deref()
                            .map(|d| d.to_lowercase().contains(needle))
                            .unwrap_or(false)
                }
                None => true,
            })
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .cloned()
            .collect())
    }

    fn image_detail(&self, id: &str) -> Result<ImageRecord> {
        self.take_failure()?;
        self.records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("image {id} not found"))
    }

    fn record_view(&self, id: &str) -> Result<()> {
        self.views.lock().push(id.to_string());
        Ok(())
    }

    fn record_download(&self, id: &str) -> Result<()> {
        self.downloads.lock().push(id.to_string());
        Ok(())
    }

    fn user_images(&self, user_id: &str) -> Result<Vec<ImageRecord>> {
        self.take_failure()?;
        Ok(self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn image_tags(&self, id: &str) -> Result<Vec<String>> {
        self.take_failure()?;
        Ok(self.tags.get(id).cloned().unwrap_or_default())
    }

    fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.take_failure()?;
        let mut comments = self.comments.get(id).cloned().unwrap_or_default();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: &str) -> ImageRecord {
    use chrono::{TimeZone, Utc};
    ImageRecord {
        id: id.to_string(),
        title: format!("Image {id}"),
        description: None,
        file_name: Some(format!("{id}.jpg")),
        file_path: format!("u1/{id}.jpg"),
        file_size: 1024,
        mime_type: "image/jpeg".into(),
        user_id: "u1".into(),
        category_id: None,
        is_public: true,
        view_count: 0,
        download_count: 0,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        category: None,
        owner: None,
    }
}
