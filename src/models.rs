use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image row as returned by the `images` table, including the embedded
/// category and owner relations when the query asked for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    pub file_path: String,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub mime_type: String,
    pub user_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "categories", skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryRef>,
    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
}

impl ImageRecord {
    /// Name used when the file is saved locally.
    pub fn download_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        self.file_path
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(&self.id)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRef {
    #[serde(default)]
    pub email: Option<String>,
}

/// Comment on an image, with the author's profile when embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "profiles")]
    pub author: Option<OwnerRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub color: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySummary {
    pub category: Category,
    pub image_count: i64,
}

/// Authenticated user identity as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_embedded_relations() {
        let raw = r##"{
            "id": "a1",
            "title": "Dunes",
            "description": null,
            "file_name": "dunes.jpg",
            "file_path": "u1/1700000000_abc.jpg",
            "file_size": 2048,
            "mime_type": "image/jpeg",
            "user_id": "u1",
            "category_id": "c1",
            "is_public": true,
            "view_count": 7,
            "download_count": 2,
            "created_at": "2024-03-01T10:00:00+00:00",
            "categories": {"name": "Nature", "color": "#22C55E"},
            "profiles": {"email": "sam@example.com"}
        }"##;
        let record: ImageRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.category.as_ref().unwrap().name, "Nature");
        assert_eq!(
            record.owner.unwrap().email.as_deref(),
            Some("sam@example.com")
        );
        assert!(record.description.is_none());
    }

    #[test]
    fn comment_author_is_optional() {
        let raw = r#"[
            {"id": "k1", "content": "lovely", "created_at": "2024-03-02T09:00:00Z",
             "profiles": {"email": "ana@example.com"}},
            {"id": "k2", "content": "meh", "created_at": "2024-03-01T09:00:00Z",
             "profiles": null}
        ]"#;
        let comments: Vec<Comment> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            comments[0].author.as_ref().and_then(|a| a.email.as_deref()),
            Some("ana@example.com")
        );
        assert!(comments[1].author.is_none());
    }

    #[test]
    fn download_name_falls_back_to_path() {
        let raw = r#"{
            "id": "a1",
            "title": "Dunes",
            "file_path": "u1/1700000000_abc.jpg",
            "user_id": "u1",
            "created_at": "2024-03-01T10:00:00Z"
        }"#;
        let record: ImageRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.download_name(), "1700000000_abc.jpg");
        assert!(record.category.is_none());
    }
}
