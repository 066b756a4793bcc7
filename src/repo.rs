use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("store error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    /// Inserts a user. The first account in an empty store becomes the admin.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>>;
    async fn get_post(&self, id: Id) -> RepoResult<PostWithAuthor>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    /// Removes the post together with its comments.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentWithAuthor>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
}

pub trait Repo: UserRepo + PostRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + PostRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    #[derive(Default)]
    struct State {
        users: BTreeMap<Id, User>,
        posts: BTreeMap<Id, Post>,
        comments: BTreeMap<Id, Comment>,
        last_user_id: Id,
        last_post_id: Id,
        last_comment_id: Id,
    }

    impl State {
        fn with_author(&self, post: &Post) -> RepoResult<PostWithAuthor> {
            let author = self.users.get(&post.author_id).ok_or(RepoError::NotFound)?;
            Ok(PostWithAuthor {
                id: post.id,
                title: post.title.clone(),
                subtitle: post.subtitle.clone(),
                date: post.date.clone(),
                body: post.body.clone(),
                img_url: post.img_url.clone(),
                author_id: post.author_id,
                author_name: author.name.clone(),
            })
        }

        fn title_taken(&self, title: &str, except: Option<Id>) -> bool {
            self.posts.values().any(|p| p.title == title && Some(p.id) != except)
        }
    }

    /// Process-local store used for development and tests. Ids start at 1 per table.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let s = self.read()?;
            Ok(s.users.values().find(|u| u.email == email).cloned())
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.read()?;
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let role = if s.users.is_empty() { Role::Admin } else { Role::Member };
            s.last_user_id += 1;
            let user = User {
                id: s.last_user_id,
                email: new.email,
                password: new.password,
                name: new.name,
                role,
            };
            s.users.insert(user.id, user.clone());
            Ok(user)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>> {
            let s = self.read()?;
            s.posts.values().map(|p| s.with_author(p)).collect()
        }

        async fn get_post(&self, id: Id) -> RepoResult<PostWithAuthor> {
            let s = self.read()?;
            let post = s.posts.get(&id).ok_or(RepoError::NotFound)?;
            s.with_author(post)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.author_id) { return Err(RepoError::NotFound); }
            if s.title_taken(&new.title, None) { return Err(RepoError::Conflict); }
            s.last_post_id += 1;
            let post = Post {
                id: s.last_post_id,
                title: new.title,
                subtitle: new.subtitle,
                date: new.date,
                body: new.body,
                img_url: new.img_url,
                author_id: new.author_id,
            };
            s.posts.insert(post.id, post.clone());
            Ok(post)
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.write()?;

            // uniqueness and author checks before taking the mutable borrow
            if !s.posts.contains_key(&id) { return Err(RepoError::NotFound); }
            if !s.users.contains_key(&upd.author_id) { return Err(RepoError::NotFound); }
            if s.title_taken(&upd.title, Some(id)) { return Err(RepoError::Conflict); }

            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.title = upd.title;
            post.subtitle = upd.subtitle;
            post.body = upd.body;
            post.img_url = upd.img_url;
            post.author_id = upd.author_id;
            Ok(post.clone())
        }

        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.posts.remove(&id).ok_or(RepoError::NotFound)?;
            s.comments.retain(|_, c| c.post_id != id);
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentWithAuthor>> {
            let s = self.read()?;
            let v = s.comments
                .values()
                .filter(|c| c.post_id == post_id)
                .filter_map(|c| {
                    let author = s.users.get(&c.author_id)?;
                    Some(CommentWithAuthor {
                        id: c.id,
                        text: c.text.clone(),
                        author_id: c.author_id,
                        post_id: c.post_id,
                        author_name: author.name.clone(),
                        author_email: author.email.clone(),
                    })
                })
                .collect();
            Ok(v)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&new.post_id) { return Err(RepoError::NotFound); }
            if !s.users.contains_key(&new.author_id) { return Err(RepoError::NotFound); }
            s.last_comment_id += 1;
            let comment = Comment {
                id: s.last_comment_id,
                text: new.text,
                author_id: new.author_id,
                post_id: new.post_id,
            };
            s.comments.insert(comment.id, comment.clone());
            Ok(comment)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{Pool, Postgres};

    const POST_WITH_AUTHOR: &str = r#"
        SELECT p.id, p.title, p.subtitle, p.date, p.body, p.img_url, p.author_id,
               u.name AS author_name
        FROM blog_posts p
        JOIN users u ON u.id = p.author_id
    "#;

    const SINGLE_ADMIN_INDEX: &str = "users_single_admin";

    // the first account becomes admin; `users_single_admin` settles a tie
    const INSERT_FIRST_ADMIN: &str = r#"
        INSERT INTO users (email, password, name, role)
        VALUES ($1, $2, $3, CASE WHEN EXISTS (SELECT 1 FROM users) THEN 'member' ELSE 'admin' END)
        RETURNING id, email, password, name, role
    "#;

    const INSERT_MEMBER: &str = r#"
        INSERT INTO users (email, password, name, role)
        VALUES ($1, $2, $3, 'member')
        RETURNING id, email, password, name, role
    "#;

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Id,
        email: String,
        password: String,
        name: String,
        role: String,
    }

    impl TryFrom<UserRow> for User {
        type Error = RepoError;

        fn try_from(row: UserRow) -> Result<Self, Self::Error> {
            let role: Role = row.role.parse().map_err(RepoError::Internal)?;
            Ok(User { id: row.id, email: row.email, password: row.password, name: row.name, role })
        }
    }

    fn map_db_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            _ => RepoError::Internal(e.to_string()),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        /// Connects eagerly so an unreachable database fails at startup.
        pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await?;
            Ok(Self::new(pool))
        }

        /// Creates the schema when absent.
        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT id, email, password, name, role FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool).await.map_err(map_db_err)?;
            row.map(User::try_from).transpose()
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>("SELECT id, email, password, name, role FROM users WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_db_err)?;
            User::try_from(row)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let insert = |sql: &'static str| {
                sqlx::query_as::<_, UserRow>(sql)
                    .bind(new.email.clone())
                    .bind(new.password.clone())
                    .bind(new.name.clone())
            };
            let first = insert(INSERT_FIRST_ADMIN).fetch_one(&self.pool).await;
            let row = match first {
                Ok(row) => row,
                // a concurrent first registration took the admin seat
                Err(sqlx::Error::Database(db)) if db.constraint() == Some(SINGLE_ADMIN_INDEX) => {
                    insert(INSERT_MEMBER).fetch_one(&self.pool).await.map_err(map_db_err)?
                }
                Err(e) => return Err(map_db_err(e)),
            };
            User::try_from(row)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self) -> RepoResult<Vec<PostWithAuthor>> {
            let recs = sqlx::query_as::<_, PostWithAuthor>(&format!("{POST_WITH_AUTHOR} ORDER BY p.id"))
                .fetch_all(&self.pool).await.map_err(map_db_err)?;
            Ok(recs)
        }

        async fn get_post(&self, id: Id) -> RepoResult<PostWithAuthor> {
            let rec = sqlx::query_as::<_, PostWithAuthor>(&format!("{POST_WITH_AUTHOR} WHERE p.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_db_err)?;
            Ok(rec)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let rec = sqlx::query_as::<_, Post>(r#"
                INSERT INTO blog_posts (title, subtitle, date, body, img_url, author_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, title, subtitle, date, body, img_url, author_id
            "#)
                .bind(&new.title).bind(&new.subtitle).bind(&new.date)
                .bind(&new.body).bind(&new.img_url).bind(new.author_id)
                .fetch_one(&self.pool).await.map_err(map_db_err)?;
            Ok(rec)
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let rec = sqlx::query_as::<_, Post>(r#"
                UPDATE blog_posts
                SET title = $2, subtitle = $3, body = $4, img_url = $5, author_id = $6
                WHERE id = $1
                RETURNING id, title, subtitle, date, body, img_url, author_id
            "#)
                .bind(id)
                .bind(&upd.title).bind(&upd.subtitle).bind(&upd.body)
                .bind(&upd.img_url).bind(upd.author_id)
                .fetch_one(&self.pool).await.map_err(map_db_err)?;
            Ok(rec)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            // comments go with it (ON DELETE CASCADE)
            let res = sqlx::query("DELETE FROM blog_posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_db_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentWithAuthor>> {
            let recs = sqlx::query_as::<_, CommentWithAuthor>(r#"
                SELECT c.id, c.text, c.author_id, c.post_id,
                       u.name AS author_name, u.email AS author_email
                FROM comments c
                JOIN users u ON u.id = c.author_id
                WHERE c.post_id = $1
                ORDER BY c.id
            "#)
                .bind(post_id)
                .fetch_all(&self.pool).await.map_err(map_db_err)?;
            Ok(recs)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let rec = sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (text, author_id, post_id) VALUES ($1, $2, $3) RETURNING id, text, author_id, post_id"
            )
                .bind(&new.text).bind(new.author_id).bind(new.post_id)
                .fetch_one(&self.pool).await.map_err(map_db_err)?;
            Ok(rec)
        }
    }
}
