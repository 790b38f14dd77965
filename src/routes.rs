use std::sync::Arc;
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use sha2::{Sha256, Digest};

use crate::auth::{Auth, Role};
use crate::error::{ApiError, FieldError};
use crate::models::Id;
use crate::permissions::{check, Action, AllowAny, IsAuthenticatedOrReadOnly, IsOwnerOrReadOnly, IsPrivilegedOrReadOnly, Requester};
use crate::repo::{Repo, RepoError};
use crate::serializers::*;
use crate::storage::{ImageStore, ImageStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::Validation(vec![FieldError::new("non_field_errors", err.to_string())]).into()
    }));
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/boards")
                    .route(web::get().to(list_boards))
                    .route(web::post().to(create_board)),
            )
            .service(
                web::resource("/boards/{id}")
                    .route(web::get().to(get_board))
                    .route(web::put().to(update_board))
                    .route(web::patch().to(update_board)),
            )
            .service(web::resource("/boards/{id}/threads").route(web::get().to(list_threads)))
            .service(web::resource("/boards/{id}/latest-post").route(web::get().to(latest_post)))
            .service(web::resource("/threads").route(web::post().to(create_thread)))
            .service(
                web::resource("/threads/{id}")
                    .route(web::get().to(get_thread))
                    .route(web::put().to(update_thread))
                    .route(web::patch().to(update_thread))
                    .route(web::delete().to(delete_thread)),
            )
            .service(web::resource("/threads/{id}/posts").route(web::get().to(list_posts)))
            .service(web::resource("/posts").route(web::post().to(create_post)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(get_post))
                    .route(web::put().to(update_post))
                    .route(web::patch().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/profiles").route(web::post().to(create_profile)))
            .service(web::resource("/profiles/{id}").route(web::get().to(profile_detail)))
            .service(
                web::resource("/profiles/{id}/update")
                    .route(web::get().to(profile_update_retrieve))
                    .route(web::put().to(profile_update))
                    .route(web::patch().to(profile_update)),
            )
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/images").route(web::post().to(upload_image))),
    );
    // no /api/v1 prefix so image URLs resolve as /media/<key>
    cfg.route("/media/{key:.*}", web::get().to(get_media));
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo>, pub image_store: Arc<dyn ImageStore> }

fn requester(auth: &Option<Auth>) -> Requester {
    Requester::from_auth(auth.as_ref())
}

fn is_partial(req: &HttpRequest) -> bool {
    *req.method() == Method::PATCH
}

// ---------------- boards ----------------

#[utoipa::path(
    get,
    path = "/api/v1/boards",
    responses((status = 200, description = "Boards ordered by name", body = [BoardListItem]))
)]
pub async fn list_boards(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let boards = data.repo.list_boards().await?;
    let items: Vec<BoardListItem> = boards.iter().map(BoardListItem::from).collect();
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/boards",
    request_body = BoardWrite,
    responses(
        (status = 201, description = "Board created", body = BoardDetail),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn create_board(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<BoardWrite>,
) -> Result<HttpResponse, ApiError> {
    check(&IsPrivilegedOrReadOnly, &requester(&auth), Action::Write, &())?;
    let new = payload.into_inner().into_new()?;
    let board = data.repo.create_board(new).await?;
    Ok(HttpResponse::Created().json(BoardDetail::new(board, &[])))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board with its threads", body = BoardDetail),
        (status = 404, description = "Board not found")
    )
)]
pub async fn get_board(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let board = data.repo.get_board(path.into_inner()).await?;
    let threads = data.repo.list_threads(board.id).await?;
    Ok(HttpResponse::Ok().json(BoardDetail::new(board, &threads)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/boards/{id}",
    request_body = BoardWrite,
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board updated", body = BoardDetail),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn update_board(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<BoardWrite>,
) -> Result<HttpResponse, ApiError> {
    let board = data.repo.get_board(path.into_inner()).await?;
    check(&IsPrivilegedOrReadOnly, &requester(&auth), Action::from_method(req.method()), &board)?;
    let upd = payload.into_inner().into_update(is_partial(&req))?;
    let board = data.repo.update_board(board.id, upd).await?;
    let threads = data.repo.list_threads(board.id).await?;
    Ok(HttpResponse::Ok().json(BoardDetail::new(board, &threads)))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}/threads",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Threads of the board, oldest first", body = [ThreadListItem]),
        (status = 404, description = "Board not found")
    )
)]
pub async fn list_threads(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let board = data.repo.get_board(path.into_inner()).await?;
    let threads = data.repo.list_threads(board.id).await?;
    let items: Vec<ThreadListItem> = threads.iter().map(ThreadListItem::from).collect();
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}/latest-post",
    params(("id" = Id, Path, description = "Board id")),
    responses(
        (status = 200, description = "Most recent post on the board, or null", body = PostView),
        (status = 404, description = "Board not found")
    )
)]
pub async fn latest_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.latest_post(path.into_inner()).await?;
    let view = match post {
        Some(p) => Some(PostView::new(&p, data.image_store.as_ref()).await),
        None => None,
    };
    Ok(HttpResponse::Ok().json(view))
}

// ---------------- threads ----------------

async fn thread_detail(data: &AppState, thread: crate::models::Thread) -> Result<ThreadDetail, ApiError> {
    let posts = data.repo.list_posts(thread.id).await?;
    Ok(ThreadDetail::new(thread, &posts, data.image_store.as_ref()).await)
}

#[utoipa::path(
    post,
    path = "/api/v1/threads",
    request_body = ThreadWrite,
    responses(
        (status = 201, description = "Thread created", body = ThreadDetail),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn create_thread(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<ThreadWrite>,
) -> Result<HttpResponse, ApiError> {
    let who = requester(&auth);
    check(&IsAuthenticatedOrReadOnly, &who, Action::Write, &())?;
    let subject = who.subject().ok_or(ApiError::Forbidden)?;
    let new = payload.into_inner().into_new(subject.to_string())?;
    let thread = data.repo.create_thread(new).await?;
    tracing::info!(thread = thread.id, board = thread.board_id, slug = %thread.slug, "thread created");
    Ok(HttpResponse::Created().json(thread_detail(&data, thread).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with its posts", body = ThreadDetail),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(thread_detail(&data, thread).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/threads/{id}",
    request_body = ThreadWrite,
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread updated; created and latestReplyTime are refreshed", body = ThreadDetail),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Thread or board not found")
    )
)]
pub async fn update_thread(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ThreadWrite>,
) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &thread)?;
    let upd = payload.into_inner().into_update(is_partial(&req))?;
    let thread = data.repo.update_thread(thread.id, upd).await?;
    Ok(HttpResponse::Ok().json(thread_detail(&data, thread).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/threads/{id}",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 204, description = "Thread and its posts deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn delete_thread(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &thread)?;
    data.repo.delete_thread(thread.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}/posts",
    params(("id" = Id, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Posts of the thread, oldest first", body = [PostView]),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn list_posts(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts(path.into_inner()).await?;
    let views = PostView::many(&posts, data.image_store.as_ref()).await;
    Ok(HttpResponse::Ok().json(views))
}

// ---------------- posts ----------------

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = PostWrite,
    responses(
        (status = 201, description = "Post created; thread counters bumped", body = PostView),
        (status = 400, description = "Validation failed or requester has no profile"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn create_post(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    payload: web::Json<PostWrite>,
) -> Result<HttpResponse, ApiError> {
    let who = requester(&auth);
    check(&IsAuthenticatedOrReadOnly, &who, Action::Write, &())?;
    let subject = who.subject().ok_or(ApiError::Forbidden)?;
    let profile = match data.repo.get_profile_by_user(subject).await {
        Ok(p) => p,
        Err(RepoError::NotFound) => return Err(ApiError::field("poster", "Requester has no profile.")),
        Err(e) => return Err(e.into()),
    };
    let new = payload.into_inner().into_new(profile.id)?;
    let post = data.repo.create_post(new).await?;
    Ok(HttpResponse::Created().json(PostView::new(&post, data.image_store.as_ref()).await))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = PostView),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PostView::new(&post, data.image_store.as_ref()).await))
}

#[utoipa::path(
    patch,
    path = "/api/v1/posts/{id}",
    request_body = PostWrite,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = PostView),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Post or thread not found")
    )
)]
pub async fn update_post(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PostWrite>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &post)?;
    let upd = payload.into_inner().into_update(is_partial(&req))?;
    let post = data.repo.update_post(post.id, upd).await?;
    Ok(HttpResponse::Ok().json(PostView::new(&post, data.image_store.as_ref()).await))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 204, description = "Post deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &post)?;
    data.repo.delete_post(post.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- profiles ----------------

#[utoipa::path(
    post,
    path = "/api/v1/profiles",
    request_body = ProfileWrite,
    responses(
        (status = 201, description = "Profile created for the requester", body = ProfileDetail),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Requester already has a profile")
    )
)]
pub async fn create_profile(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<ProfileWrite>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner().into_new(auth.0.sub)?;
    let profile = data.repo.create_profile(new).await?;
    Ok(HttpResponse::Created().json(ProfileDetail::from(profile)))
}

#[utoipa::path(
    get,
    path = "/api/v1/profiles/{id}",
    params(("id" = Id, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile", body = ProfileDetail),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn profile_detail(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let profile = data.repo.get_profile(path.into_inner()).await?;
    check(&AllowAny, &requester(&auth), Action::from_method(req.method()), &profile)?;
    Ok(HttpResponse::Ok().json(ProfileDetail::from(profile)))
}

#[utoipa::path(
    get,
    path = "/api/v1/profiles/{id}/update",
    params(("id" = Id, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile", body = ProfileDetail),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn profile_update_retrieve(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let profile = data.repo.get_profile(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &profile)?;
    Ok(HttpResponse::Ok().json(ProfileDetail::from(profile)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/profiles/{id}/update",
    request_body = ProfileWrite,
    params(("id" = Id, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile updated", body = ProfileDetail),
        (status = 403, description = "Only the owner may update"),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn profile_update(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ProfileWrite>,
) -> Result<HttpResponse, ApiError> {
    // lookup first: a missing profile is 404 even for non-owners
    let profile = data.repo.get_profile(path.into_inner()).await?;
    check(&IsOwnerOrReadOnly, &requester(&auth), Action::from_method(req.method()), &profile)?;
    let upd = payload.into_inner().into_update(is_partial(&req))?;
    let profile = data.repo.update_profile(profile.id, upd).await?;
    Ok(HttpResponse::Ok().json(ProfileDetail::from(profile)))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub subject: String,
    pub role: String,
    pub profile: Option<Id>,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current requester", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // highest privilege wins
    let role = if auth.0.roles.iter().any(|r| matches!(r, Role::Admin)) {
        "admin"
    } else if auth.0.roles.iter().any(|r| matches!(r, Role::Moderator)) {
        "moderator"
    } else {
        "user"
    };
    let profile = match data.repo.get_profile_by_user(&auth.0.sub).await {
        Ok(p) => Some(p.id),
        Err(RepoError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(HttpResponse::Ok().json(MeResponse { subject: auth.0.sub, role: role.to_string(), profile }))
}

// ---------------- images ----------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    /// Value to send as a post's `image`.
    pub key: String,
    pub url: Option<String>,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool,
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/images",
    responses(
        (status = 201, description = "Image stored", body = ImageUploadResponse),
        (status = 200, description = "Image already stored", body = ImageUploadResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload too large"),
        (status = 415, description = "Unsupported media type")
    )
)]
pub async fn upload_image(_auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        tracing::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if field.content_disposition().get_name() != Some("file") { continue; }
        let mut hasher = Sha256::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            tracing::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT { return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish()); }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let Some(kind) = infer::get(&bytes).filter(|k| ALLOWED_MIME.contains(&k.mime_type())) else {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        };
        let key = format!("postImages/{:x}.{}", hasher.finalize(), kind.extension());
        let mime = kind.mime_type().to_string();
        let (status, duplicate) = match data.image_store.save(&key, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => { tracing::error!("image_store save error: {e}"); return Err(ApiError::Internal); }
        };
        let url = data.image_store.url(&key).await.ok();
        let resp = ImageUploadResponse { key, url, mime, size: bytes.len(), duplicate };
        return Ok(HttpResponse::build(status).json(resp));
    }
    Err(ApiError::field("file", "No file was submitted."))
}

pub async fn get_media(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    match data.image_store.load(&key).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes)),
        Err(ImageStoreError::NotFound | ImageStoreError::InvalidKey) => Err(ApiError::NotFound),
        Err(e) => { tracing::error!("image_store load error: {e}"); Err(ApiError::Internal) }
    }
}
