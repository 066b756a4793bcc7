use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{debug, info, warn};

use crate::auth::{Session, SessionKeys};
use crate::error::ApiError;
use crate::forms::{self, CommentForm, ContactForm, FieldErrors, LoginForm, PostForm, RegisterForm};
use crate::mail::{ContactMessage, Mailer};
use crate::models::*;
use crate::password::PasswordHasher;
use crate::repo::{Repo, RepoError};
use crate::views::{self, Page, Views};

const ALREADY_REGISTERED: &str = "You've already signed up with that email, log in instead.";
const UNKNOWN_EMAIL: &str = "That email doesn't exist, please try again.";
const WRONG_PASSWORD: &str = "Incorrect password, please try again.";
const LOGIN_TO_COMMENT: &str = "You need to login or register to comment.";
const DUPLICATE_TITLE: &str = "A post with this title already exists.";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(list_posts)))
        .service(
            web::resource("/register")
                .route(web::get().to(register_form))
                .route(web::post().to(register)),
        )
        .service(
            web::resource("/login")
                .route(web::get().to(login_form))
                .route(web::post().to(login)),
        )
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(
            web::resource("/post/{id}")
                .route(web::get().to(show_post))
                .route(web::post().to(add_comment)),
        )
        .service(
            web::resource("/new-post")
                .route(web::get().to(new_post_form))
                .route(web::post().to(create_post)),
        )
        .service(
            web::resource("/edit-post/{id}")
                .route(web::get().to(edit_post_form))
                .route(web::post().to(update_post)),
        )
        .service(web::resource("/delete/{id}").route(web::get().to(delete_post)))
        .service(web::resource("/about").route(web::get().to(about)))
        .service(
            web::resource("/contact")
                .route(web::get().to(contact_form))
                .route(web::post().to(contact)),
        );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub mailer: Arc<dyn Mailer>,
    pub views: Arc<Views>,
    pub sessions: SessionKeys,
    pub hasher: PasswordHasher,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repo>,
        mailer: Arc<dyn Mailer>,
        sessions: SessionKeys,
        hasher: PasswordHasher,
    ) -> Result<Self, tera::Error> {
        Ok(Self { repo, mailer, views: Arc::new(Views::new()?), sessions, hasher })
    }

    fn respond(&self, req: &HttpRequest, session: &Session, page: Page) -> Result<HttpResponse, ApiError> {
        self.views.respond(req, session, page)
    }
}

// POST-then-GET
fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther().insert_header((header::LOCATION, location.to_string())).finish()
}

fn found(location: &str) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, location.to_string())).finish()
}

fn flash_redirect(location: &str, msg: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location.to_string()))
        .cookie(views::flash(msg))
        .finish()
}

fn field_error(field: &str, msg: &str) -> FieldErrors {
    FieldErrors::from([(field.to_string(), vec![msg.to_string()])])
}

/// PBKDF2 runs on the blocking pool, never on the async worker.
async fn hash_password(hasher: PasswordHasher, password: String) -> Result<String, ApiError> {
    web::block(move || hasher.hash(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("password hashing: {e}")))
}

async fn verify_password(hasher: PasswordHasher, password: String, digest: String) -> Result<bool, ApiError> {
    web::block(move || hasher.verify(&password, &digest))
        .await
        .map_err(|e| ApiError::Internal(format!("password check: {e}")))
}

fn today() -> String {
    chrono::Local::now().format("%B %d, %Y").to_string()
}

// ---------------- accounts ----------------

pub async fn register_form(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.respond(&req, &session, Page::new("register.html").with("form", &RegisterForm::default()))
}

pub async fn register(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    form: web::Form<RegisterForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    if let Err(errors) = forms::check(&req, &form) {
        return data.respond(&req, &session, Page::new("register.html").with("form", &form).errors(&errors));
    }
    let email = form.email.trim().to_string();
    if data.repo.find_user_by_email(&email).await?.is_some() {
        debug!(%email, "registration for existing email");
        return Ok(flash_redirect("/login", ALREADY_REGISTERED));
    }
    let password = hash_password(data.hasher, form.password.clone()).await?;
    let new = NewUser { email, password, name: form.name.trim().to_string() };
    let user = match data.repo.create_user(new).await {
        Ok(user) => user,
        // lost the race against a concurrent registration
        Err(RepoError::Conflict) => return Ok(flash_redirect("/login", ALREADY_REGISTERED)),
        Err(e) => return Err(e.into()),
    };
    info!(user_id = user.id, role = %user.role, "user registered");
    let cookie = data.sessions.issue(&user).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(HttpResponse::SeeOther().insert_header((header::LOCATION, "/")).cookie(cookie).finish())
}

pub async fn login_form(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.respond(&req, &session, Page::new("login.html").with("form", &LoginForm::default()))
}

pub async fn login(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    let page = Page::new("login.html").with("form", &form);
    if let Err(errors) = forms::check(&req, &form) {
        return data.respond(&req, &session, page.errors(&errors));
    }
    let Some(user) = data.repo.find_user_by_email(form.email.trim()).await? else {
        debug!("login with unknown email");
        return data.respond(&req, &session, page.message(UNKNOWN_EMAIL));
    };
    if !verify_password(data.hasher, form.password.clone(), user.password.clone()).await? {
        info!(user_id = user.id, "login with wrong password");
        return data.respond(&req, &session, page.message(WRONG_PASSWORD));
    }
    info!(user_id = user.id, "user logged in");
    let cookie = data.sessions.issue(&user).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(HttpResponse::SeeOther().insert_header((header::LOCATION, "/")).cookie(cookie).finish())
}

pub async fn logout(session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let who = session.require_user()?;
    debug!(user_id = who.user_id, "user logged out");
    Ok(HttpResponse::Found().insert_header((header::LOCATION, "/")).cookie(data.sessions.clear()).finish())
}

// ---------------- posts & comments ----------------

pub async fn list_posts(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts().await?;
    data.respond(&req, &session, Page::new("index.html").with("posts", &posts))
}

async fn post_page(data: &AppState, post: &PostWithAuthor, form: &CommentForm) -> Result<Page, ApiError> {
    let comments = data.repo.list_comments(post.id).await?;
    Ok(Page::new("post.html").with("post", post).with("comments", &comments).with("form", form))
}

pub async fn show_post(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let page = post_page(&data, &post, &CommentForm::default()).await?;
    data.respond(&req, &session, page)
}

pub async fn add_comment(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    form: web::Form<CommentForm>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let Some(author) = session.identity() else {
        return Ok(flash_redirect("/login", LOGIN_TO_COMMENT));
    };
    let form = form.into_inner();
    if let Err(errors) = forms::check(&req, &form) {
        let page = post_page(&data, &post, &form).await?.errors(&errors);
        return data.respond(&req, &session, page);
    }
    let comment = data
        .repo
        .create_comment(NewComment { text: form.text, author_id: author.user_id, post_id: post.id })
        .await?;
    debug!(comment_id = comment.id, post_id = post.id, user_id = author.user_id, "comment added");
    Ok(see_other(&format!("/post/{}", post.id)))
}

fn post_editor(form: &PostForm, action: &str, is_edit: bool) -> Page {
    Page::new("make-post.html").with("form", form).with("action", action).with("is_edit", &is_edit)
}

pub async fn new_post_form(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    session.require_admin()?;
    data.respond(&req, &session, post_editor(&PostForm::default(), "/new-post", false))
}

pub async fn create_post(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    form: web::Form<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let admin = session.require_admin()?;
    let form = form.into_inner();
    if let Err(errors) = forms::check(&req, &form) {
        return data.respond(&req, &session, post_editor(&form, "/new-post", false).errors(&errors));
    }
    let new = NewPost {
        title: form.title.clone(),
        subtitle: form.subtitle.clone(),
        date: today(),
        body: form.body.clone(),
        img_url: form.img_url.clone(),
        author_id: admin.user_id,
    };
    match data.repo.create_post(new).await {
        Ok(post) => {
            info!(post_id = post.id, title = %post.title, "post created");
            Ok(see_other("/"))
        }
        Err(RepoError::Conflict) => {
            let errors = field_error("title", DUPLICATE_TITLE);
            data.respond(&req, &session, post_editor(&form, "/new-post", false).errors(&errors))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn edit_post_form(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    session.require_admin()?;
    let post = data.repo.get_post(path.into_inner()).await?;
    let action = format!("/edit-post/{}", post.id);
    data.respond(&req, &session, post_editor(&PostForm::from(&post), &action, true))
}

pub async fn update_post(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    form: web::Form<PostForm>,
) -> Result<HttpResponse, ApiError> {
    let admin = session.require_admin()?;
    let post = data.repo.get_post(path.into_inner()).await?;
    let action = format!("/edit-post/{}", post.id);
    let form = form.into_inner();
    if let Err(errors) = forms::check(&req, &form) {
        return data.respond(&req, &session, post_editor(&form, &action, true).errors(&errors));
    }
    let upd = UpdatePost {
        title: form.title.clone(),
        subtitle: form.subtitle.clone(),
        body: form.body.clone(),
        img_url: form.img_url.clone(),
        author_id: admin.user_id,
    };
    match data.repo.update_post(post.id, upd).await {
        Ok(updated) => {
            info!(post_id = updated.id, title = %updated.title, "post updated");
            Ok(see_other(&format!("/post/{}", updated.id)))
        }
        Err(RepoError::Conflict) => {
            let errors = field_error("title", DUPLICATE_TITLE);
            data.respond(&req, &session, post_editor(&form, &action, true).errors(&errors))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_post(session: Session, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    session.require_admin()?;
    let id = path.into_inner();
    data.repo.delete_post(id).await?;
    info!(post_id = id, "post deleted");
    Ok(found("/"))
}

// ---------------- static pages & contact ----------------

pub async fn about(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.respond(&req, &session, Page::new("about.html"))
}

pub async fn contact_form(req: HttpRequest, session: Session, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.respond(&req, &session, Page::new("contact.html").with("msg_sent", &false))
}

pub async fn contact(
    req: HttpRequest,
    session: Session,
    data: web::Data<AppState>,
    form: web::Form<ContactForm>,
) -> Result<HttpResponse, ApiError> {
    let msg = ContactMessage::from(form.into_inner());
    if let Err(e) = data.mailer.send_contact(&msg).await {
        warn!(sender = %msg.email, "contact message not delivered");
        return Err(e.into());
    }
    data.respond(&req, &session, Page::new("contact.html").with("msg_sent", &true))
}
