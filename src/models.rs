use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Characters of the opening message shown in thread listings.
pub const BLURB_LEN: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Profile {
    pub id: Id,
    pub user: String, // owning subject (JWT `sub`)
    pub name: String,
    pub bio: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub user: String,
    pub name: String,
    pub bio: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Board {
    pub id: Id,
    pub name: String,
    pub tag: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBoard {
    pub name: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBoard {
    pub name: Option<String>,
    pub tag: Option<String>,
}

/// Thread row joined with its board tag and opening post.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Thread {
    pub id: Id,
    pub board_id: Id,
    /// Subject that created the thread; owner for permission checks.
    pub creator_subject: String,
    pub title: String,
    pub slug: String,
    pub created: DateTime<Utc>,
    pub reply_count: i64,
    pub views: i64,
    pub image_count: i64,
    pub latest_reply_time: DateTime<Utc>,
    pub board_tag: String,
    pub opening_message: Option<String>,
    pub opening_image: Option<String>,
    pub opening_poster: Option<String>, // profile name
}

impl Thread {
    pub fn blurb(&self) -> Option<String> {
        self.opening_message.as_deref().map(blurb)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewThread {
    pub board_id: Id,
    pub creator_subject: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateThread {
    pub board_id: Option<Id>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub thread_id: Id,
    pub poster_id: Id,
    pub poster_subject: String,
    pub title: String,
    pub message: String,
    pub image: Option<String>, // storage key
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub thread_id: Id,
    pub poster_id: Id,
    pub title: String,
    pub message: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePost {
    pub thread_id: Option<Id>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub image: Option<String>,
}

/// Slug generated for a new thread: lowercased, spaces become hyphens.
/// Collisions are not resolved.
pub fn slugify(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

pub fn blurb(message: &str) -> String {
    message.chars().take(BLURB_LEN).collect()
}
