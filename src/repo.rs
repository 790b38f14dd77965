use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait BoardRepo: Send + Sync {
    /// Boards ordered by name ascending.
    async fn list_boards(&self) -> RepoResult<Vec<Board>>;
    async fn get_board(&self, id: Id) -> RepoResult<Board>;
    async fn create_board(&self, new: NewBoard) -> RepoResult<Board>;
    async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board>;
    /// Removes the board together with its threads and their posts.
    async fn delete_board(&self, id: Id) -> RepoResult<()>;
    /// Most recently created post across every thread of the board.
    async fn latest_post(&self, board_id: Id) -> RepoResult<Option<Post>>;
}

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    /// Threads of a board, oldest first.
    async fn list_threads(&self, board_id: Id) -> RepoResult<Vec<Thread>>;
    async fn get_thread(&self, id: Id) -> RepoResult<Thread>;
    async fn create_thread(&self, new: NewThread) -> RepoResult<Thread>;
    /// Every save refreshes `created` and `latest_reply_time`.
    async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread>;
    async fn delete_thread(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Posts of a thread, oldest first.
    async fn list_posts(&self, thread_id: Id) -> RepoResult<Vec<Post>>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    /// Inserts the post and bumps the owning thread's counters as one unit.
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    /// Counters on the thread are left untouched.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile>;
    async fn get_profile_by_user(&self, user: &str) -> RepoResult<Profile>;
    /// One profile per subject; a second one is a conflict.
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile>;
}

pub trait Repo: BoardRepo + ThreadRepo + PostRepo + ProfileRepo {}

impl<T> Repo for T where T: BoardRepo + ThreadRepo + PostRepo + ProfileRepo {}

/// Empty image keys clear the attachment.
fn normalize_image(image: Option<String>) -> Option<String> {
    image.filter(|i| !i.is_empty())
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ThreadRow {
        id: Id,
        board_id: Id,
        #[serde(default)]
        creator_subject: String,
        title: String,
        slug: String,
        created: DateTime<Utc>,
        reply_count: i64,
        views: i64,
        image_count: i64,
        latest_reply_time: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PostRow {
        id: Id,
        thread_id: Id,
        poster_id: Id,
        title: String,
        message: String,
        image: Option<String>,
        created: DateTime<Utc>,
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        boards: HashMap<Id, Board>,
        threads: HashMap<Id, ThreadRow>,
        posts: HashMap<Id, PostRow>,
        profiles: HashMap<Id, Profile>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn posts_of(&self, thread_id: Id) -> Vec<&PostRow> {
            let mut v: Vec<_> = self.posts.values().filter(|p| p.thread_id == thread_id).collect();
            v.sort_by_key(|p| (p.created, p.id));
            v
        }

        fn post(&self, row: &PostRow) -> Post {
            let poster_subject = self
                .profiles
                .get(&row.poster_id)
                .map(|p| p.user.clone())
                .unwrap_or_default();
            Post {
                id: row.id,
                thread_id: row.thread_id,
                poster_id: row.poster_id,
                poster_subject,
                title: row.title.clone(),
                message: row.message.clone(),
                image: row.image.clone(),
                created: row.created,
            }
        }

        fn thread(&self, row: &ThreadRow) -> Thread {
            let board_tag = self.boards.get(&row.board_id).map(|b| b.tag.clone()).unwrap_or_default();
            let opening = self.posts_of(row.id).into_iter().next();
            let opening_poster = opening.and_then(|p| self.profiles.get(&p.poster_id)).map(|p| p.name.clone());
            Thread {
                id: row.id,
                board_id: row.board_id,
                creator_subject: row.creator_subject.clone(),
                title: row.title.clone(),
                slug: row.slug.clone(),
                created: row.created,
                reply_count: row.reply_count,
                views: row.views,
                image_count: row.image_count,
                latest_reply_time: row.latest_reply_time,
                board_tag,
                opening_message: opening.map(|p| p.message.clone()),
                opening_image: opening.and_then(|p| p.image.clone()),
                opening_poster,
            }
        }

        fn remove_thread(&mut self, thread_id: Id) {
            self.threads.remove(&thread_id);
            self.posts.retain(|_, p| p.thread_id != thread_id);
        }
    }

    /// Process-local repository persisted as a JSON snapshot after each write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        /// Loads `path` if it holds a snapshot; starts empty otherwise.
        pub fn open(path: impl Into<PathBuf>) -> Self {
            let snapshot_path = path.into();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}' ({e}); starting empty", path.display());
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Called with the write guard held, so snapshots land in mutation order.
        /// The file is replaced by rename; readers never see a partial write.
        fn persist(&self, state: &State) {
            let path = self.snapshot_path.as_path();
            let bytes = match serde_json::to_vec_pretty(state) {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to serialize snapshot: {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let tmp = path.with_extension("json.tmp");
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path)) {
                warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    #[async_trait]
    impl BoardRepo for InMemRepo {
        async fn list_boards(&self) -> RepoResult<Vec<Board>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.boards.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            Ok(v)
        }
        async fn get_board(&self, id: Id) -> RepoResult<Board> {
            let s = self.read()?;
            s.boards.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_board(&self, new: NewBoard) -> RepoResult<Board> {
            let mut s = self.write()?;
            let id = s.next_id();
            // boards have no slug generation path
            let board = Board { id, name: new.name, tag: new.tag, slug: String::new() };
            s.boards.insert(id, board.clone());
            self.persist(&s);
            Ok(board)
        }
        async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board> {
            let mut s = self.write()?;
            let board = s.boards.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name { board.name = name; }
            if let Some(tag) = upd.tag { board.tag = tag; }
            let updated = board.clone();
            self.persist(&s);
            Ok(updated)
        }
        async fn delete_board(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.boards.remove(&id).ok_or(RepoError::NotFound)?;
            let threads: Vec<Id> = s.threads.values().filter(|t| t.board_id == id).map(|t| t.id).collect();
            for tid in threads {
                s.remove_thread(tid);
            }
            self.persist(&s);
            Ok(())
        }
        async fn latest_post(&self, board_id: Id) -> RepoResult<Option<Post>> {
            let s = self.read()?;
            if !s.boards.contains_key(&board_id) { return Err(RepoError::NotFound); }
            let latest = s
                .posts
                .values()
                .filter(|p| s.threads.get(&p.thread_id).is_some_and(|t| t.board_id == board_id))
                .max_by_key(|p| (p.created, p.id));
            Ok(latest.map(|p| s.post(p)))
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn list_threads(&self, board_id: Id) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            let mut rows: Vec<_> = s.threads.values().filter(|t| t.board_id == board_id).collect();
            rows.sort_by_key(|t| (t.created, t.id));
            Ok(rows.into_iter().map(|t| s.thread(t)).collect())
        }
        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            let s = self.read()?;
            s.threads.get(&id).map(|t| s.thread(t)).ok_or(RepoError::NotFound)
        }
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            if !s.boards.contains_key(&new.board_id) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let id = s.next_id();
            let row = ThreadRow {
                id,
                board_id: new.board_id,
                creator_subject: new.creator_subject,
                slug: slugify(&new.title),
                title: new.title,
                created: now,
                reply_count: 0,
                views: 0,
                image_count: 0,
                latest_reply_time: now,
            };
            let thread = s.thread(&row);
            s.threads.insert(id, row);
            self.persist(&s);
            Ok(thread)
        }
        async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread> {
            let mut s = self.write()?;
            if let Some(board_id) = upd.board_id {
                if !s.boards.contains_key(&board_id) { return Err(RepoError::NotFound); }
            }
            let row = s.threads.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title { row.title = title; }
            if let Some(board_id) = upd.board_id { row.board_id = board_id; }
            let now = Utc::now();
            row.created = now;
            row.latest_reply_time = now;
            let row = row.clone();
            let thread = s.thread(&row);
            self.persist(&s);
            Ok(thread)
        }
        async fn delete_thread(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.threads.contains_key(&id) { return Err(RepoError::NotFound); }
            s.remove_thread(id);
            self.persist(&s);
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self, thread_id: Id) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            if !s.threads.contains_key(&thread_id) { return Err(RepoError::NotFound); }
            Ok(s.posts_of(thread_id).into_iter().map(|p| s.post(p)).collect())
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.read()?;
            s.posts.get(&id).map(|p| s.post(p)).ok_or(RepoError::NotFound)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            // insert and counter bump happen under one write guard
            let mut s = self.write()?;
            if !s.threads.contains_key(&new.thread_id) { return Err(RepoError::NotFound); }
            if !s.profiles.contains_key(&new.poster_id) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let id = s.next_id();
            let row = PostRow {
                id,
                thread_id: new.thread_id,
                poster_id: new.poster_id,
                title: new.title,
                message: new.message,
                image: normalize_image(new.image),
                created: now,
            };
            if let Some(th) = s.threads.get_mut(&new.thread_id) {
                th.reply_count += 1;
                if row.image.is_some() { th.image_count += 1; }
                th.created = now;
                th.latest_reply_time = now;
            }
            let post = s.post(&row);
            s.posts.insert(id, row);
            self.persist(&s);
            Ok(post)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if let Some(thread_id) = upd.thread_id {
                if !s.threads.contains_key(&thread_id) { return Err(RepoError::NotFound); }
            }
            let row = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(thread_id) = upd.thread_id { row.thread_id = thread_id; }
            if let Some(title) = upd.title { row.title = title; }
            if let Some(message) = upd.message { row.message = message; }
            if let Some(image) = upd.image { row.image = normalize_image(Some(image)); }
            row.created = Utc::now();
            let row = row.clone();
            let post = s.post(&row);
            self.persist(&s);
            Ok(post)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.posts.remove(&id).ok_or(RepoError::NotFound)?;
            self.persist(&s);
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileRepo for InMemRepo {
        async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
            let s = self.read()?;
            s.profiles.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_profile_by_user(&self, user: &str) -> RepoResult<Profile> {
            let s = self.read()?;
            s.profiles.values().find(|p| p.user == user).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
            let mut s = self.write()?;
            if s.profiles.values().any(|p| p.user == new.user) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let profile = Profile { id, user: new.user, name: new.name, bio: new.bio, created: Utc::now() };
            s.profiles.insert(id, profile.clone());
            self.persist(&s);
            Ok(profile)
        }
        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
            let mut s = self.write()?;
            let profile = s.profiles.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name { profile.name = name; }
            if let Some(bio) = upd.bio { profile.bio = bio; }
            let updated = profile.clone();
            self.persist(&s);
            Ok(updated)
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const THREAD_SELECT: &str = r#"
        SELECT t.id, t.board_id, t.creator_subject, t.title, t.slug, t.created, t.reply_count, t.views,
               t.image_count, t.latest_reply_time, b.tag AS board_tag,
               op.message AS opening_message, op.image AS opening_image,
               pr.name AS opening_poster
        FROM threads t
        JOIN boards b ON b.id = t.board_id
        LEFT JOIN LATERAL (
           SELECT p.message, p.image, p.poster_id FROM posts p
           WHERE p.thread_id = t.id
           ORDER BY p.created ASC, p.id ASC LIMIT 1
        ) op ON TRUE
        LEFT JOIN profiles pr ON pr.id = op.poster_id
    "#;

    const POST_SELECT: &str = r#"
        SELECT p.id, p.thread_id, p.poster_id, pr.user_subject AS poster_subject,
               p.title, p.message, p.image, p.created
        FROM posts p
        JOIN profiles pr ON pr.id = p.poster_id
    "#;

    const PROFILE_SELECT: &str =
        r#"SELECT id, user_subject AS "user", name, bio, created FROM profiles"#;

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => RepoError::Conflict,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => RepoError::NotFound,
            _ => {
                tracing::error!("postgres error: {e}");
                RepoError::Internal(e.to_string())
            }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Applies the schema in `migrations/`.
        pub async fn migrate(&self) -> RepoResult<()> {
            sqlx::migrate!("./migrations")
                .run(&self.pool)
                .await
                .map_err(|e| RepoError::Internal(e.to_string()))
        }
    }

    #[async_trait]
    impl BoardRepo for PgRepo {
        async fn list_boards(&self) -> RepoResult<Vec<Board>> {
            sqlx::query_as::<_, Board>("SELECT id, name, tag, slug FROM boards ORDER BY name ASC, id ASC")
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_board(&self, id: Id) -> RepoResult<Board> {
            sqlx::query_as::<_, Board>("SELECT id, name, tag, slug FROM boards WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_board(&self, new: NewBoard) -> RepoResult<Board> {
            sqlx::query_as::<_, Board>("INSERT INTO boards (name, tag) VALUES ($1, $2) RETURNING id, name, tag, slug")
                .bind(&new.name).bind(&new.tag)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_board(&self, id: Id, upd: UpdateBoard) -> RepoResult<Board> {
            sqlx::query_as::<_, Board>(
                "UPDATE boards SET name = COALESCE($2, name), tag = COALESCE($3, tag) WHERE id = $1 RETURNING id, name, tag, slug"
            )
            .bind(id)
            .bind(upd.name.as_ref())
            .bind(upd.tag.as_ref())
            .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn delete_board(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM boards WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
        async fn latest_post(&self, board_id: Id) -> RepoResult<Option<Post>> {
            self.get_board(board_id).await?;
            let sql = format!(
                "{POST_SELECT} JOIN threads t ON t.id = p.thread_id WHERE t.board_id = $1 ORDER BY p.created DESC, p.id DESC LIMIT 1"
            );
            sqlx::query_as::<_, Post>(&sql)
                .bind(board_id)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn list_threads(&self, board_id: Id) -> RepoResult<Vec<Thread>> {
            let sql = format!("{THREAD_SELECT} WHERE t.board_id = $1 ORDER BY t.created ASC, t.id ASC");
            sqlx::query_as::<_, Thread>(&sql)
                .bind(board_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_thread(&self, id: Id) -> RepoResult<Thread> {
            let sql = format!("{THREAD_SELECT} WHERE t.id = $1");
            sqlx::query_as::<_, Thread>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO threads (board_id, creator_subject, title, slug) VALUES ($1, $2, $3, $4) RETURNING id"
            )
            .bind(new.board_id)
            .bind(&new.creator_subject)
            .bind(&new.title)
            .bind(slugify(&new.title))
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_thread(id).await
        }
        async fn update_thread(&self, id: Id, upd: UpdateThread) -> RepoResult<Thread> {
            sqlx::query_scalar::<_, Id>(
                "UPDATE threads SET title = COALESCE($2, title), board_id = COALESCE($3, board_id), \
                 created = now(), latest_reply_time = now() WHERE id = $1 RETURNING id"
            )
            .bind(id)
            .bind(upd.title.as_ref())
            .bind(upd.board_id)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_thread(id).await
        }
        async fn delete_thread(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM threads WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self, thread_id: Id) -> RepoResult<Vec<Post>> {
            self.get_thread(thread_id).await?;
            let sql = format!("{POST_SELECT} WHERE p.thread_id = $1 ORDER BY p.created ASC, p.id ASC");
            sqlx::query_as::<_, Post>(&sql)
                .bind(thread_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let sql = format!("{POST_SELECT} WHERE p.id = $1");
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let image = normalize_image(new.image);
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let id: Id = sqlx::query_scalar(
                "INSERT INTO posts (thread_id, poster_id, title, message, image) VALUES ($1, $2, $3, $4, $5) RETURNING id"
            )
            .bind(new.thread_id)
            .bind(new.poster_id)
            .bind(&new.title)
            .bind(&new.message)
            .bind(image.as_ref())
            .fetch_one(&mut *tx).await.map_err(map_err)?;
            // single-statement increment; no read-modify-write
            sqlx::query(
                "UPDATE threads SET reply_count = reply_count + 1, image_count = image_count + $2, \
                 created = now(), latest_reply_time = now() WHERE id = $1"
            )
            .bind(new.thread_id)
            .bind(if image.is_some() { 1_i64 } else { 0 })
            .execute(&mut *tx).await.map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            self.get_post(id).await
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            sqlx::query_scalar::<_, Id>(
                "UPDATE posts SET thread_id = COALESCE($2, thread_id), title = COALESCE($3, title), \
                 message = COALESCE($4, message), \
                 image = CASE WHEN $5::text IS NULL THEN image WHEN $5 = '' THEN NULL ELSE $5 END, \
                 created = now() WHERE id = $1 RETURNING id"
            )
            .bind(id)
            .bind(upd.thread_id)
            .bind(upd.title.as_ref())
            .bind(upd.message.as_ref())
            .bind(upd.image.as_ref())
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_post(id).await
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileRepo for PgRepo {
        async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
            let sql = format!("{PROFILE_SELECT} WHERE id = $1");
            sqlx::query_as::<_, Profile>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_profile_by_user(&self, user: &str) -> RepoResult<Profile> {
            let sql = format!("{PROFILE_SELECT} WHERE user_subject = $1");
            sqlx::query_as::<_, Profile>(&sql)
                .bind(user)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
            sqlx::query_as::<_, Profile>(
                r#"INSERT INTO profiles (user_subject, name, bio) VALUES ($1, $2, $3)
                   RETURNING id, user_subject AS "user", name, bio, created"#
            )
            .bind(&new.user)
            .bind(&new.name)
            .bind(&new.bio)
            .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
            sqlx::query_as::<_, Profile>(
                r#"UPDATE profiles SET name = COALESCE($2, name), bio = COALESCE($3, bio) WHERE id = $1
                   RETURNING id, user_subject AS "user", name, bio, created"#
            )
            .bind(id)
            .bind(upd.name.as_ref())
            .bind(upd.bio.as_ref())
            .fetch_one(&self.pool).await.map_err(map_err)
        }
    }
}
