#![cfg(feature = "inmem-store")]

#[macro_use]
mod common;

use std::sync::Arc;

use actix_web::http::StatusCode;
use common::{location, Client, RecordingMailer};
use rustblog::models::{NewPost, NewUser};
use rustblog::password::PasswordHasher;
use rustblog::repo::inmem::InMemRepo;
use rustblog::repo::{CommentRepo, PostRepo, UserRepo};

/// Store with the admin account and one published post (id 1).
async fn seeded() -> InMemRepo {
    let repo = InMemRepo::new();
    let admin = repo
        .create_user(NewUser {
            email: "angela@example.com".into(),
            password: PasswordHasher::new(2).hash("admin-pw"),
            name: "Angela".into(),
        })
        .await
        .unwrap();
    repo.create_post(NewPost {
        title: "The Life of Cactus".into(),
        subtitle: "Who knew that cacti lived such interesting lives.".into(),
        date: "October 19, 2026".into(),
        body: "<p>Nori grape silver beet broccoli kombu beet greens fava bean potato.</p>".into(),
        img_url: "https://images.example.com/cactus.jpg".into(),
        author_id: admin.id,
    })
    .await
    .unwrap();
    repo
}

#[actix_web::test]
async fn register_login_and_comment() {
    let repo = seeded().await;
    let app = app!(common::state(&repo, Arc::new(RecordingMailer::default())));

    let mut alice = Client::new();
    register!(app, alice, "a@example.com", "Alice");
    let resp = send!(app, alice, alice.get("/logout"));
    assert_eq!(resp.status(), StatusCode::FOUND);

    let resp = send!(app, alice, alice.post("/login", &[("email", "a@example.com"), ("password", "pw123")]));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let resp = send!(app, alice, alice.get("/post/1"));
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text!(resp);
    assert!(html.contains("The Life of Cactus"));
    // body is trusted admin HTML
    assert!(html.contains("<p>Nori grape silver beet"));
    // members get no edit link
    assert!(!html.contains("href=\"/edit-post/1\""));

    let resp = send!(app, alice, alice.post("/post/1", &[("text", "Great post!")]));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/post/1");

    let resp = send!(app, alice, alice.get("/post/1"));
    let html = body_text!(resp);
    assert!(html.contains("Great post!"));
    assert!(html.contains("Alice"));
    assert!(html.contains("https://www.gravatar.com/avatar/"));

    let comments = repo.list_comments(1).await.unwrap();
    assert_eq!(comments.len(), 1);
    let alice_id = repo.find_user_by_email("a@example.com").await.unwrap().unwrap().id;
    assert_eq!(comments[0].author_id, alice_id);
    assert_eq!(comments[0].post_id, 1);
    assert_eq!(comments[0].author_name, "Alice");
}

#[actix_web::test]
async fn anonymous_comment_is_sent_to_login() {
    let repo = seeded().await;
    let app = app!(common::state(&repo, Arc::new(RecordingMailer::default())));
    let mut anon = Client::new();

    let resp = send!(app, anon, anon.post("/post/1", &[("text", "drive-by")]));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");

    let resp = send!(app, anon, anon.get("/login"));
    assert!(body_text!(resp).contains("You need to login or register to comment."));
    assert!(repo.list_comments(1).await.unwrap().is_empty());
}

#[actix_web::test]
async fn bad_comments_are_rejected() {
    let repo = seeded().await;
    let app = app!(common::state(&repo, Arc::new(RecordingMailer::default())));
    let mut alice = Client::new();
    register!(app, alice, "a@example.com", "Alice");

    let resp = send!(app, alice, alice.post("/post/1", &[("text", "   ")]));
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text!(resp).contains("This field is required."));

    let resp = send!(app, alice, alice.post_raw("/post/1", &[("text", "forged"), ("csrf_token", "stolen")]));
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text!(resp).contains("The CSRF token is missing or invalid."));

    let resp = send!(app, alice, alice.post("/post/42", &[("text", "lost")]));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    assert!(repo.list_comments(1).await.unwrap().is_empty());
}

#[actix_web::test]
async fn comment_text_is_escaped() {
    let repo = seeded().await;
    let app = app!(common::state(&repo, Arc::new(RecordingMailer::default())));
    let mut alice = Client::new();
    register!(app, alice, "a@example.com", "Alice");

    let resp = send!(app, alice, alice.post("/post/1", &[("text", "<script>alert(1)</script>")]));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let resp = send!(app, alice, alice.get("/post/1"));
    let html = body_text!(resp);
    assert!(!html.contains("<script>alert(1)</script>"));
    assert!(html.contains("&lt;script&gt;"));
}
