#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use forum::auth::{create_jwt, Role};
use forum::repo::inmem::InMemRepo;
use forum::storage::{FsImageStore, ImageStore, ImageStoreError};
use forum::{config, AppState};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

/// Fresh in-memory repo and filesystem image store rooted in a temp dir.
fn state() -> (AppState, tempfile::TempDir) {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let repo = InMemRepo::open(dir.path().join("state.json"));
    let store = FsImageStore::new(dir.path().join("media"), "/media");
    (AppState { repo: Arc::new(repo), image_store: Arc::new(store) }, dir)
}

fn bearer(subject: &str, role: Role) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", create_jwt(subject, vec![role]).unwrap()))
}

fn admin() -> (&'static str, String) { bearer("root", Role::Admin) }
fn user(subject: &str) -> (&'static str, String) { bearer(subject, Role::User) }

// Store whose URL lookup always fails.
struct BrokenUrlStore;

#[async_trait::async_trait]
impl ImageStore for BrokenUrlStore {
    async fn save(&self, _: &str, _: &str, _: &[u8]) -> Result<(), ImageStoreError> { Ok(()) }
    async fn load(&self, _: &str) -> Result<(Vec<u8>, String), ImageStoreError> { Err(ImageStoreError::NotFound) }
    async fn url(&self, _: &str) -> Result<String, ImageStoreError> { Err(ImageStoreError::Other("backend offline".into())) }
}

// Minimal 1x1 PNG
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A,
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

fn build_multipart(bytes: &[u8], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(format!("--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n", boundary).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

#[actix_web::test]
#[serial]
async fn board_create_detail_and_listing() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_i64().unwrap();

    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{id}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let detail: Value = test::read_body_json(resp).await;
    assert_eq!(detail, json!({"id": id, "name": "Random", "tag": "rnd", "slug": "", "threads": []}));

    for (name, tag) in [("Technology", "g"), ("Anime", "a")] {
        let req = test::TestRequest::post()
            .uri("/api/v1/boards")
            .insert_header(admin())
            .set_json(json!({"name": name, "tag": tag, "slug": "ignored"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::get().uri("/api/v1/boards").to_request();
    let list: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let names: Vec<_> = list.as_array().unwrap().iter().map(|b| b["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["Anime", "Random", "Technology"]);
    assert!(list[0].get("slug").is_none(), "list projection is id, name, tag");
}

#[actix_web::test]
#[serial]
async fn board_writes_need_privilege() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(bearer("mod", Role::Moderator))
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let created: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = created["id"].as_i64().unwrap();

    // PUT is a full update; PATCH is partial
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/boards/{id}"))
        .insert_header(admin())
        .set_json(json!({"name": "Renamed"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["fields"][0]["field"], "tag");

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/boards/{id}"))
        .insert_header(admin())
        .set_json(json!({"name": "Renamed"}))
        .to_request();
    let upd: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(upd["name"], "Renamed");
    assert_eq!(upd["tag"], "rnd");

    let req = test::TestRequest::patch()
        .uri("/api/v1/boards/9999")
        .insert_header(admin())
        .set_json(json!({"name": "Ghost"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn validation_errors_are_listed_per_field() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"tag": "way-too-long-tag"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "validation failed");
    let fields: Vec<_> = err["fields"].as_array().unwrap().iter().map(|f| f["field"].as_str().unwrap()).collect();
    assert_eq!(fields, ["name", "tag"]);

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["fields"][0]["field"], "non_field_errors");

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "No board"}))
        .to_request();
    let err: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(err["fields"], json!([{"field": "board", "message": "This field is required."}]));

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "Orphan", "board": 9999}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn thread_and_post_flow() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let board_id = board["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Alice", "bio": "hi"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let profile: Value = test::read_body_json(resp).await;
    let profile_id = profile["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "Hello World", "board": board_id, "image": "ignored.png"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let thread: Value = test::read_body_json(resp).await;
    let thread_id = thread["id"].as_i64().unwrap();
    assert_eq!(thread["slug"], "hello-world");
    assert_eq!(thread["tag"], "rnd");
    assert_eq!(thread["board"], board_id);
    assert_eq!(thread["replyCount"], 0);
    assert!(thread["poster"].is_null());
    assert_eq!(thread["posts"], json!([]));

    let message = "This opening message is certainly longer than fifty characters in total.";
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread_id, "message": message}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: Value = test::read_body_json(resp).await;
    assert_eq!(post["poster"], profile_id);
    assert!(post["image"].is_null());

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread_id, "message": "second"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{thread_id}")).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["replyCount"], 2);
    assert_eq!(detail["poster"], "Alice");
    assert_eq!(detail["blurb"], message.chars().take(50).collect::<String>());
    let messages: Vec<_> = detail["posts"].as_array().unwrap().iter().map(|p| p["message"].as_str().unwrap()).collect();
    assert_eq!(messages, [message, "second"]);

    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{board_id}")).to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let listed = &board["threads"][0];
    assert_eq!(listed["replyCount"], 2);
    assert_eq!(listed["poster"], "Alice");
    assert!(listed.get("posts").is_none());

    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{thread_id}/posts")).to_request();
    let posts: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(posts.as_array().unwrap().len(), 2);

    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{board_id}/latest-post")).to_request();
    let latest: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(latest["message"], "second");
}

#[actix_web::test]
#[serial]
async fn posting_requires_a_profile() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("nobody"))
        .set_json(json!({"title": "t", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("nobody"))
        .set_json(json!({"thread": thread["id"], "message": "hi"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["fields"][0]["field"], "poster");

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(json!({"thread": thread["id"], "message": "hi"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}

#[actix_web::test]
#[serial]
async fn thread_edits_are_owner_only_and_refresh_timestamps() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    for who in ["alice", "bob"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/profiles")
            .insert_header(user(who))
            .set_json(json!({"name": who}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }
    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "Mine", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let thread_id = thread["id"].as_i64().unwrap();
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread_id, "message": "op"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/threads/{thread_id}"))
        .insert_header(user("bob"))
        .set_json(json!({"title": "Hijacked"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let before = chrono::Utc::now();
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/threads/{thread_id}"))
        .insert_header(user("alice"))
        .set_json(json!({"title": "Renamed"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let upd: Value = test::read_body_json(resp).await;
    assert_eq!(upd["title"], "Renamed");
    assert_eq!(upd["slug"], "mine");
    let created: chrono::DateTime<chrono::Utc> = serde_json::from_value(upd["created"].clone()).unwrap();
    let latest: chrono::DateTime<chrono::Utc> = serde_json::from_value(upd["latestReplyTime"].clone()).unwrap();
    assert!(created >= before);
    assert!(latest >= before);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/threads/{thread_id}"))
        .insert_header(user("bob"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/threads/{thread_id}"))
        .insert_header(admin())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{thread_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn post_edits_are_owner_only() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Alice"}))
        .to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "t", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread["id"], "message": "draft"}))
        .to_request();
    let post: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let post_id = post["id"].as_i64().unwrap();

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(user("bob"))
        .set_json(json!({"message": "vandalised"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(user("alice"))
        .set_json(json!({"message": "final"}))
        .to_request();
    let upd: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(upd["message"], "final");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(user("alice"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::get().uri(&format!("/api/v1/posts/{post_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn profile_permission_matrix() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Alice"}))
        .to_request();
    let profile: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = profile["id"].as_i64().unwrap();

    // second profile for the same subject
    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Again"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    for uri in [format!("/api/v1/profiles/{id}"), format!("/api/v1/profiles/{id}/update")] {
        let req = test::TestRequest::get().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200, "anonymous read of {uri}");
        let req = test::TestRequest::get().uri(&uri).insert_header(user("bob")).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200, "other user read of {uri}");
    }

    let update = format!("/api/v1/profiles/{id}/update");
    let req = test::TestRequest::patch().uri(&update).set_json(json!({"name": "Anon"})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::patch()
        .uri(&update)
        .insert_header(user("bob"))
        .set_json(json!({"name": "Bob was here"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::patch()
        .uri(&update)
        .insert_header(user("alice"))
        .set_json(json!({"bio": "updated"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let upd: Value = test::read_body_json(resp).await;
    assert_eq!(upd["name"], "Alice");
    assert_eq!(upd["bio"], "updated");

    let req = test::TestRequest::put()
        .uri(&update)
        .insert_header(admin())
        .set_json(json!({"name": "Moderated", "bio": ""}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // absent object: not-found wins over forbidden
    let req = test::TestRequest::patch()
        .uri("/api/v1/profiles/9999/update")
        .insert_header(user("bob"))
        .set_json(json!({"name": "x"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn unresolvable_images_serialize_as_null() {
    setup_env();
    let dir = tempfile::tempdir().unwrap();
    let repo = InMemRepo::open(dir.path().join("state.json"));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState { repo: Arc::new(repo), image_store: Arc::new(BrokenUrlStore) }))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Alice"}))
        .to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "pics", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread["id"], "message": "look", "image": "postImages/gone.png"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: Value = test::read_body_json(resp).await;
    assert!(post["image"].is_null());

    let req = test::TestRequest::get().uri(&format!("/api/v1/threads/{}", thread["id"])).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["imageCount"], 1);
    assert!(detail["posts"][0]["image"].is_null());
}

#[actix_web::test]
#[serial]
async fn uploaded_image_resolves_and_is_served() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let (content_type, body) = build_multipart(&sample_png(), "BOUNDARY123");
    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(("Content-Type", content_type.clone()))
        .set_payload(body.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(user("alice"))
        .insert_header(("Content-Type", content_type.clone()))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let uploaded: Value = test::read_body_json(resp).await;
    let key = uploaded["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("postImages/") && key.ends_with(".png"));
    assert_eq!(uploaded["mime"], "image/png");

    // same bytes again: idempotent
    let req = test::TestRequest::post()
        .uri("/api/v1/images")
        .insert_header(user("alice"))
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let again: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(again["duplicate"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("alice"))
        .set_json(json!({"name": "Alice"}))
        .to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "pics", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("alice"))
        .set_json(json!({"thread": thread["id"], "image": &key}))
        .to_request();
    let post: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let url = post["image"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/media/{key}"));

    let req = test::TestRequest::get().uri(&url).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
}

#[actix_web::test]
#[serial]
async fn auth_me_reports_role_and_profile() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::get().uri("/api/v1/auth/me").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer("carol", Role::Moderator)).to_request();
    let me: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(me, json!({"subject": "carol", "role": "moderator", "profile": null}));

    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("dave"))
        .set_json(json!({"name": "Dave"}))
        .to_request();
    let profile: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(user("dave")).to_request();
    let me: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(me["profile"], profile["id"]);
    assert_eq!(me["role"], "user");
}

#[actix_web::test]
#[serial]
async fn thread_creator_owns_it_before_and_after_replies() {
    let (state, _dir) = state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/boards")
        .insert_header(admin())
        .set_json(json!({"name": "Random", "tag": "rnd"}))
        .to_request();
    let board: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/profiles")
        .insert_header(user("bob"))
        .set_json(json!({"name": "Bob"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/v1/threads")
        .insert_header(user("alice"))
        .set_json(json!({"title": "Mine", "board": board["id"]}))
        .to_request();
    let thread: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let uri = format!("/api/v1/threads/{}", thread["id"]);

    // no posts yet: the creator can still edit
    let req = test::TestRequest::patch()
        .uri(&uri)
        .insert_header(user("alice"))
        .set_json(json!({"title": "Mine, edited"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // someone else writes the first post
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(user("bob"))
        .set_json(json!({"thread": thread["id"], "message": "first"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::patch()
        .uri(&uri)
        .insert_header(user("bob"))
        .set_json(json!({"title": "Bob's now"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete().uri(&uri).insert_header(user("alice")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
}
