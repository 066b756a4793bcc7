//! Server-side rendering: embedded tera templates, per-page context and flash messages.

use std::collections::HashMap;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie};
use actix_web::http::header::ContentType;
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tera::{Context, Tera, Value};

use crate::auth::Session;
use crate::error::ApiError;
use crate::forms::{self, FieldErrors};

pub const FLASH_COOKIE: &str = "_flash";

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("macros.html", include_str!("../templates/macros.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("post.html", include_str!("../templates/post.html")),
    ("make-post.html", include_str!("../templates/make-post.html")),
    ("register.html", include_str!("../templates/register.html")),
    ("login.html", include_str!("../templates/login.html")),
    ("about.html", include_str!("../templates/about.html")),
    ("contact.html", include_str!("../templates/contact.html")),
];

/// What the navigation bar and admin controls need to know about the visitor.
#[derive(Debug, Serialize)]
struct CurrentUser<'a> {
    logged_in: bool,
    is_admin: bool,
    id: Option<i64>,
    name: Option<&'a str>,
}

impl<'a> From<&'a Session> for CurrentUser<'a> {
    fn from(session: &'a Session) -> Self {
        let identity = session.identity();
        Self {
            logged_in: identity.is_some(),
            is_admin: session.is_admin(),
            id: identity.map(|i| i.user_id),
            name: identity.map(|i| i.name.as_str()),
        }
    }
}

/// One page to render: template plus handler-specific context.
pub struct Page {
    template: &'static str,
    ctx: Context,
    messages: Vec<String>,
}

impl Page {
    pub fn new(template: &'static str) -> Self {
        Self { template, ctx: Context::new(), messages: Vec::new() }
    }

    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        self.ctx.insert(key, value);
        self
    }

    pub fn errors(self, errors: &FieldErrors) -> Self {
        self.with("errors", errors)
    }

    /// Message shown on this render only.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.messages.push(msg.into());
        self
    }
}

pub struct Views {
    tera: Tera,
}

impl Views {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())?;
        tera.register_function("gravatar", gravatar);
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, ctx: &Context) -> Result<String, tera::Error> {
        self.tera.render(template, ctx)
    }

    /// Renders `page` for this visitor. Consumes a pending flash message and
    /// hands out a CSRF token (minting the cookie on first visit).
    pub fn respond(&self, req: &HttpRequest, session: &Session, page: Page) -> Result<HttpResponse, ApiError> {
        let Page { template, mut ctx, mut messages } = page;

        let flashed = take_flash(req);
        if let Some(msg) = &flashed {
            messages.insert(0, msg.clone());
        }
        let (csrf_token, csrf_cookie) = forms::csrf_token(req);

        ctx.insert("current_user", &CurrentUser::from(session));
        ctx.insert("messages", &messages);
        ctx.insert("csrf_token", &csrf_token);
        if !ctx.contains_key("errors") {
            ctx.insert("errors", &FieldErrors::new());
        }

        let html = self.render(template, &ctx)?;
        let mut resp = HttpResponse::Ok();
        resp.content_type(ContentType::html());
        if let Some(c) = csrf_cookie {
            resp.cookie(c);
        }
        if flashed.is_some() {
            resp.cookie(clear_flash());
        }
        Ok(resp.body(html))
    }
}

/// Cookie carrying `msg` across the next redirect.
pub fn flash(msg: &str) -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, urlencoding::encode(msg).into_owned())
        .path("/")
        .http_only(true)
        .finish()
}

fn clear_flash() -> Cookie<'static> {
    Cookie::build(FLASH_COOKIE, "")
        .path("/")
        .max_age(CookieDuration::ZERO)
        .finish()
}

fn take_flash(req: &HttpRequest) -> Option<String> {
    let cookie = req.cookie(FLASH_COOKIE)?;
    if cookie.value().is_empty() {
        return None;
    }
    urlencoding::decode(cookie.value()).ok().map(|m| m.into_owned())
}

pub fn gravatar_url(email: &str, size: u64) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("https://www.gravatar.com/avatar/{}?s={size}&d=retro&r=g", hex::encode(digest))
}

fn gravatar(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let email = args
        .get("email")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("gravatar() takes an `email` string"))?;
    let size = args.get("size").and_then(Value::as_u64).unwrap_or(100);
    Ok(Value::String(gravatar_url(email, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::models::Role;
    use actix_web::test::TestRequest;

    fn admin() -> Session {
        Session(Some(Identity { user_id: 1, name: "Angela".into(), role: Role::Admin }))
    }

    #[test]
    fn all_templates_parse() {
        let views = Views::new().expect("templates");
        let names: Vec<_> = views.tera.get_template_names().collect();
        for (name, _) in TEMPLATES {
            assert!(names.contains(name), "{name} missing");
        }
    }

    #[test]
    fn gravatar_hashes_normalised_email() {
        let a = gravatar_url("  Alice@Example.com ", 100);
        let b = gravatar_url("alice@example.com", 100);
        assert_eq!(a, b);
        assert!(a.starts_with("https://www.gravatar.com/avatar/"));
        assert!(a.ends_with("?s=100&d=retro&r=g"));
    }

    #[actix_web::test]
    async fn flash_is_shown_once_and_cleared() {
        let views = Views::new().unwrap();
        let req = TestRequest::default().cookie(flash("You've already signed up")).to_http_request();
        let resp = views
            .respond(&req, &Session::default(), Page::new("about.html"))
            .expect("render");
        let cleared = resp.cookies().find(|c| c.name() == FLASH_COOKIE).expect("flash cleared");
        assert_eq!(cleared.max_age(), Some(CookieDuration::ZERO));
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("You&#x27;ve already signed up"));
    }

    #[actix_web::test]
    async fn admin_sees_admin_controls() {
        let views = Views::new().unwrap();
        let req = TestRequest::default().to_http_request();
        let posts: Vec<crate::models::PostWithAuthor> = Vec::new();
        let resp = views
            .respond(&req, &admin(), Page::new("index.html").with("posts", &posts))
            .unwrap();
        // first visit mints the csrf cookie
        assert!(resp.cookies().any(|c| c.name() == forms::CSRF_COOKIE));
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("href=\"/new-post\""));
        assert!(html.contains("Log Out"));
    }

    #[actix_web::test]
    async fn post_editor_loads_rich_text_editor() {
        let views = Views::new().unwrap();
        let req = TestRequest::default().to_http_request();
        let page = Page::new("make-post.html")
            .with("form", &forms::PostForm::default())
            .with("action", "/new-post")
            .with("is_edit", &false);
        let resp = views.respond(&req, &admin(), page).unwrap();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains(r#"<script src="https://cdn.ckeditor.com/4.22.1/standard/ckeditor.js"></script>"#));
        assert!(html.contains("form-control ckeditor"));

        // other pages do not pull the editor in
        let resp = views.respond(&req, &admin(), Page::new("about.html")).unwrap();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("ckeditor.js"));
    }
}
