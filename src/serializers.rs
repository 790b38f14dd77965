//! Wire representations: read projections per entity and the write payloads
//! accepted by create/update endpoints.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{field_errors, ApiError, FieldError};
use crate::models::*;
use crate::storage::ImageStore;

const REQUIRED: &str = "This field is required.";

/// Runs the derived validators, then reports any missing required fields.
fn validate_payload<T: Validate>(payload: &T, required: &[(&str, bool)]) -> Result<(), ApiError> {
    let mut fields = match payload.validate() {
        Ok(()) => Vec::new(),
        Err(e) => field_errors(&e),
    };
    fields.extend(
        required
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| FieldError::new(*name, REQUIRED)),
    );
    if fields.is_empty() {
        return Ok(());
    }
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    Err(ApiError::Validation(fields))
}

// ---------------- read projections ----------------

#[derive(Debug, Serialize, ToSchema)]
pub struct BoardListItem {
    pub id: Id,
    pub name: String,
    pub tag: String,
}

impl From<&Board> for BoardListItem {
    fn from(b: &Board) -> Self {
        Self { id: b.id, name: b.name.clone(), tag: b.tag.clone() }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BoardDetail {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub tag: String,
    pub threads: Vec<ThreadListItem>,
}

impl BoardDetail {
    pub fn new(board: Board, threads: &[Thread]) -> Self {
        Self {
            id: board.id,
            name: board.name,
            slug: board.slug,
            tag: board.tag,
            threads: threads.iter().map(ThreadListItem::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListItem {
    pub id: Id,
    pub title: String,
    pub blurb: Option<String>,
    pub views: i64,
    pub reply_count: i64,
    pub image_count: i64,
    pub created: DateTime<Utc>,
    pub poster: Option<String>,
}

impl From<&Thread> for ThreadListItem {
    fn from(t: &Thread) -> Self {
        Self {
            id: t.id,
            title: t.title.clone(),
            blurb: t.blurb(),
            views: t.views,
            reply_count: t.reply_count,
            image_count: t.image_count,
            created: t.created,
            poster: t.opening_poster.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub created: DateTime<Utc>,
    pub poster: Option<String>,
    pub tag: String,
    pub blurb: Option<String>,
    pub board: Id,
    pub reply_count: i64,
    pub latest_reply_time: DateTime<Utc>,
    pub views: i64,
    pub image_count: i64,
    pub posts: Vec<PostView>,
}

impl ThreadDetail {
    pub async fn new(thread: Thread, posts: &[Post], store: &dyn ImageStore) -> Self {
        let posts = PostView::many(posts, store).await;
        Self {
            blurb: thread.blurb(),
            id: thread.id,
            title: thread.title,
            slug: thread.slug,
            created: thread.created,
            poster: thread.opening_poster,
            tag: thread.board_tag,
            board: thread.board_id,
            reply_count: thread.reply_count,
            latest_reply_time: thread.latest_reply_time,
            views: thread.views,
            image_count: thread.image_count,
            posts,
        }
    }
}

/// Post projection shared by list and detail views.
#[derive(Debug, Serialize, ToSchema)]
pub struct PostView {
    pub id: Id,
    pub created: DateTime<Utc>,
    /// Profile id of the author.
    pub poster: Id,
    pub message: String,
    /// Accessible URL, or null when the stored reference cannot be resolved.
    pub image: Option<String>,
}

impl PostView {
    pub async fn new(post: &Post, store: &dyn ImageStore) -> Self {
        let image = match post.image.as_deref() {
            Some(key) => match store.url(key).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::debug!(post = post.id, key, "image unresolved: {e}");
                    None
                }
            },
            None => None,
        };
        Self {
            id: post.id,
            created: post.created,
            poster: post.poster_id,
            message: post.message.clone(),
            image,
        }
    }

    /// Projects `posts` in order, resolving their images concurrently.
    pub async fn many(posts: &[Post], store: &dyn ImageStore) -> Vec<Self> {
        join_all(posts.iter().map(|p| Self::new(p, store))).await
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileDetail {
    pub id: Id,
    pub name: String,
    pub bio: String,
    pub created: DateTime<Utc>,
}

impl From<Profile> for ProfileDetail {
    fn from(p: Profile) -> Self {
        Self { id: p.id, name: p.name, bio: p.bio, created: p.created }
    }
}

// ---------------- write payloads ----------------
// PATCH is partial; POST and PUT require every required field.

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct BoardWrite {
    #[validate(length(min = 1, max = 50, message = "Ensure this field has between 1 and 50 characters."))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 10, message = "Ensure this field has between 1 and 10 characters."))]
    pub tag: Option<String>,
}

impl BoardWrite {
    fn check(&self, partial: bool) -> Result<(), ApiError> {
        validate_payload(self, &[("name", partial || self.name.is_some()), ("tag", partial || self.tag.is_some())])
    }

    pub fn into_new(self) -> Result<NewBoard, ApiError> {
        self.check(false)?;
        Ok(NewBoard { name: self.name.unwrap_or_default(), tag: self.tag.unwrap_or_default() })
    }

    pub fn into_update(self, partial: bool) -> Result<UpdateBoard, ApiError> {
        self.check(partial)?;
        Ok(UpdateBoard { name: self.name, tag: self.tag })
    }
}

/// Thread payload. An `image` key sent by clients is ignored; images attach to posts.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct ThreadWrite {
    #[validate(length(min = 1, max = 250, message = "Ensure this field has between 1 and 250 characters."))]
    pub title: Option<String>,
    pub board: Option<Id>,
}

impl ThreadWrite {
    fn check(&self, partial: bool) -> Result<(), ApiError> {
        validate_payload(self, &[("title", partial || self.title.is_some()), ("board", partial || self.board.is_some())])
    }

    /// `creator_subject` comes from the requester, never from the payload.
    pub fn into_new(self, creator_subject: String) -> Result<NewThread, ApiError> {
        self.check(false)?;
        match (self.board, self.title) {
            (Some(board_id), Some(title)) => Ok(NewThread { board_id, creator_subject, title }),
            _ => Err(ApiError::field("non_field_errors", REQUIRED)),
        }
    }

    pub fn into_update(self, partial: bool) -> Result<UpdateThread, ApiError> {
        self.check(partial)?;
        Ok(UpdateThread { board_id: self.board, title: self.title })
    }
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct PostWrite {
    pub title: Option<String>,
    pub message: Option<String>,
    pub thread: Option<Id>,
    #[validate(length(max = 255, message = "Ensure this field has no more than 255 characters."))]
    pub image: Option<String>,
}

impl PostWrite {
    /// `poster_id` comes from the requester, never from the payload.
    pub fn into_new(self, poster_id: Id) -> Result<NewPost, ApiError> {
        validate_payload(&self, &[("thread", self.thread.is_some())])?;
        let thread_id = self.thread.ok_or_else(|| ApiError::field("thread", REQUIRED))?;
        Ok(NewPost {
            thread_id,
            poster_id,
            title: self.title.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            image: self.image,
        })
    }

    pub fn into_update(self, partial: bool) -> Result<UpdatePost, ApiError> {
        validate_payload(&self, &[("thread", partial || self.thread.is_some())])?;
        Ok(UpdatePost { thread_id: self.thread, title: self.title, message: self.message, image: self.image })
    }
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct ProfileWrite {
    #[validate(length(min = 1, max = 50, message = "Ensure this field has between 1 and 50 characters."))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "Ensure this field has no more than 500 characters."))]
    pub bio: Option<String>,
}

impl ProfileWrite {
    pub fn into_new(self, user: String) -> Result<NewProfile, ApiError> {
        validate_payload(&self, &[("name", self.name.is_some())])?;
        Ok(NewProfile { user, name: self.name.unwrap_or_default(), bio: self.bio.unwrap_or_default() })
    }

    pub fn into_update(self, partial: bool) -> Result<UpdateProfile, ApiError> {
        validate_payload(&self, &[("name", partial || self.name.is_some())])?;
        Ok(UpdateProfile { name: self.name, bio: self.bio })
    }
}
