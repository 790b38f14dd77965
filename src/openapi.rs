use crate::error::{ApiErrorBody, FieldError};
use crate::serializers::*;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_boards,
        crate::routes::create_board,
        crate::routes::get_board,
        crate::routes::update_board,
        crate::routes::list_threads,
        crate::routes::latest_post,
        crate::routes::create_thread,
        crate::routes::get_thread,
        crate::routes::update_thread,
        crate::routes::delete_thread,
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::create_profile,
        crate::routes::profile_detail,
        crate::routes::profile_update_retrieve,
        crate::routes::profile_update,
        crate::routes::auth_me,
        crate::routes::upload_image,
    ),
    components(schemas(
        BoardListItem, BoardDetail, BoardWrite,
        ThreadListItem, ThreadDetail, ThreadWrite,
        PostView, PostWrite,
        ProfileDetail, ProfileWrite,
        ApiErrorBody, FieldError,
        crate::routes::MeResponse, crate::routes::ImageUploadResponse
    )),
    tags(
        (name = "boards", description = "Board operations"),
        (name = "threads", description = "Thread operations"),
        (name = "posts", description = "Post operations"),
        (name = "profiles", description = "Profile operations"),
    )
)]
pub struct ApiDoc;
