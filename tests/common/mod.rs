#![allow(dead_code, unused_macros)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use actix_web::test::TestRequest;
use async_trait::async_trait;

use rustblog::auth::{SessionKeys, SESSION_COOKIE};
use rustblog::forms::{CSRF_COOKIE, CSRF_FIELD};
use rustblog::mail::{ContactMessage, MailError, Mailer};
use rustblog::password::PasswordHasher;
use rustblog::repo::inmem::InMemRepo;
use rustblog::AppState;

pub const SECRET: &[u8] = b"test-secret-must-be-32-bytes-long!!";
pub const CSRF: &str = "integration-csrf-token";

/// Keeps every contact message instead of talking SMTP.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<ContactMessage>>,
    pub fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn sent(&self) -> Vec<ContactMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_contact(&self, msg: &ContactMessage) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

pub fn state(repo: &InMemRepo, mailer: Arc<RecordingMailer>) -> AppState {
    // cheap hashes keep the suite fast
    state_with_hasher(repo, mailer, PasswordHasher::new(2))
}

pub fn state_with_hasher(repo: &InMemRepo, mailer: Arc<RecordingMailer>, hasher: PasswordHasher) -> AppState {
    AppState::new(
        Arc::new(repo.clone()),
        mailer,
        SessionKeys::new(SECRET, Duration::from_secs(3600), false),
        hasher,
    )
    .expect("templates load")
}

/// Minimal browser: remembers cookies between requests and fills in the CSRF field.
pub struct Client {
    cookies: BTreeMap<String, String>,
}

impl Client {
    pub fn new() -> Self {
        let mut cookies = BTreeMap::new();
        cookies.insert(CSRF_COOKIE.to_string(), CSRF.to_string());
        Self { cookies }
    }

    /// A client that has never loaded a page, so holds no CSRF cookie.
    pub fn bare() -> Self {
        Self { cookies: BTreeMap::new() }
    }

    pub fn get(&self, uri: &str) -> TestRequest {
        self.attach(TestRequest::get().uri(uri))
    }

    pub fn post(&self, uri: &str, fields: &[(&str, &str)]) -> TestRequest {
        let mut fields = fields.to_vec();
        fields.push((CSRF_FIELD, CSRF));
        self.post_raw(uri, &fields)
    }

    pub fn post_raw(&self, uri: &str, fields: &[(&str, &str)]) -> TestRequest {
        self.attach(TestRequest::post().uri(uri)).set_form(fields)
    }

    fn attach(&self, mut req: TestRequest) -> TestRequest {
        for (name, value) in &self.cookies {
            req = req.cookie(Cookie::new(name.clone(), value.clone()));
        }
        req
    }

    pub fn store<B>(&mut self, resp: &ServiceResponse<B>) {
        for c in resp.response().cookies() {
            if c.value().is_empty() {
                self.cookies.remove(c.name());
            } else {
                self.cookies.insert(c.name().to_string(), c.value().to_string());
            }
        }
    }

    pub fn has_session(&self) -> bool {
        self.cookies.contains_key(SESSION_COOKIE)
    }
}

pub fn location<B>(resp: &ServiceResponse<B>) -> &str {
    resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).unwrap_or("")
}

pub fn sets_session<B>(resp: &ServiceResponse<B>) -> bool {
    resp.response().cookies().any(|c| c.name() == SESSION_COOKIE && !c.value().is_empty())
}

pub fn post_fields<'a>(title: &'a str, body: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("title", title),
        ("subtitle", "A subtitle"),
        ("img_url", "https://images.example.com/cover.jpg"),
        ("body", body),
    ]
}

/// Registers through the form and keeps the resulting session on `client`.
macro_rules! register {
    ($app:expr, $client:expr, $email:expr, $name:expr) => {{
        let req = $client
            .post("/register", &[("email", $email), ("password", "pw123"), ("name", $name)])
            .to_request();
        let resp = actix_web::test::call_service(&$app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SEE_OTHER, "register {}", $email);
        $client.store(&resp);
    }};
}

/// Sends `req` built by `client`, updates its cookies and returns the response.
macro_rules! send {
    ($app:expr, $client:expr, $req:expr) => {{
        let resp = actix_web::test::call_service(&$app, $req.to_request()).await;
        $client.store(&resp);
        resp
    }};
}

macro_rules! body_text {
    ($resp:expr) => {
        String::from_utf8(actix_web::test::read_body($resp).await.to_vec()).unwrap()
    };
}

macro_rules! app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(rustblog::SecurityHeaders::default())
                .app_data(actix_web::web::Data::new($state))
                .configure(rustblog::config),
        )
        .await
    };
}
