//! Form payloads, their validation rules and CSRF protection.
//!
//! Every field defaults to empty so a partial submission re-renders the form
//! with inline errors instead of failing extraction.

use std::borrow::Cow;
use std::collections::BTreeMap;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::mail::ContactMessage;
use crate::models::PostWithAuthor;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_FIELD: &str = "csrf_token";
const CSRF_TOKEN_LEN: usize = 32;

/// Field name -> messages, as shown next to each input.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

fn required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut e = ValidationError::new("required");
        e.message = Some(Cow::Borrowed("This field is required."));
        return Err(e);
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RegisterForm {
    #[validate(custom(function = "required"), email(message = "Invalid email address."))]
    pub email: String,
    #[serde(skip_serializing)]
    #[validate(custom(function = "required"))]
    pub password: String,
    #[validate(custom(function = "required"))]
    pub name: String,
    #[serde(skip_serializing)]
    pub csrf_token: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoginForm {
    #[validate(custom(function = "required"), email(message = "Invalid email address."))]
    pub email: String,
    #[serde(skip_serializing)]
    #[validate(custom(function = "required"))]
    pub password: String,
    #[serde(skip_serializing)]
    pub csrf_token: String,
}

/// Shared by the new-post and edit-post pages.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PostForm {
    #[validate(custom(function = "required"), length(max = 250, message = "Keep it under 250 characters."))]
    pub title: String,
    #[validate(custom(function = "required"), length(max = 250, message = "Keep it under 250 characters."))]
    pub subtitle: String,
    #[validate(
        custom(function = "required"),
        url(message = "Invalid URL."),
        length(max = 250, message = "Keep it under 250 characters.")
    )]
    pub img_url: String,
    #[validate(custom(function = "required"))]
    pub body: String,
    #[serde(skip_serializing)]
    pub csrf_token: String,
}

impl From<&PostWithAuthor> for PostForm {
    fn from(post: &PostWithAuthor) -> Self {
        Self {
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            img_url: post.img_url.clone(),
            body: post.body.clone(),
            csrf_token: String::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CommentForm {
    #[validate(custom(function = "required"))]
    pub text: String,
    #[serde(skip_serializing)]
    pub csrf_token: String,
}

/// Contact submissions are relayed as typed; nothing is validated.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

impl From<ContactForm> for ContactMessage {
    fn from(f: ContactForm) -> Self {
        ContactMessage { name: f.name, email: f.email, phone: f.phone, message: f.message }
    }
}

/// Forms that carry the double-submit CSRF token.
pub trait CsrfProtected {
    fn csrf_token(&self) -> &str;
}

macro_rules! csrf_protected {
    ($($form:ty),*) => {
        $(impl CsrfProtected for $form {
            fn csrf_token(&self) -> &str { &self.csrf_token }
        })*
    };
}

csrf_protected!(RegisterForm, LoginForm, PostForm, CommentForm);

/// Runs the CSRF check and the field rules; errors are ready for the template.
pub fn check<F>(req: &HttpRequest, form: &F) -> Result<(), FieldErrors>
where
    F: Validate + CsrfProtected,
{
    let mut errors = match form.validate() {
        Ok(()) => FieldErrors::new(),
        Err(e) => collect_errors(&e),
    };
    if !csrf_matches(req, form.csrf_token()) {
        errors
            .entry(CSRF_FIELD.to_string())
            .or_default()
            .push("The CSRF token is missing or invalid.".to_string());
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

pub fn collect_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("Invalid value for {field}."),
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

fn csrf_matches(req: &HttpRequest, submitted: &str) -> bool {
    match req.cookie(CSRF_COOKIE) {
        Some(c) => !c.value().is_empty() && c.value() == submitted,
        None => false,
    }
}

/// The client's CSRF token, plus a cookie to set when a fresh one had to be minted.
pub fn csrf_token(req: &HttpRequest) -> (String, Option<Cookie<'static>>) {
    if let Some(existing) = req.cookie(CSRF_COOKIE).filter(|c| !c.value().is_empty()) {
        return (existing.value().to_string(), None);
    }
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LEN)
        .map(char::from)
        .collect();
    let cookie = Cookie::build(CSRF_COOKIE, token.clone())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();
    (token, Some(cookie))
}
