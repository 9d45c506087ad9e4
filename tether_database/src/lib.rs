pub mod error;
pub mod models;
pub mod schema;

mod migrations;

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    scoped_futures::ScopedFutureExt,
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use rand::{distributions::Alphanumeric, Rng};

use error::*;
use models::{Account, LinkRequest, User};

/// Length of the opaque token handed out for a pending link
const LINK_TOKEN_LENGTH: usize = 64;

/// How many times an insert is retried with a fresh token when the generated one
/// collides with an existing request
const TOKEN_COLLISION_RETRIES: usize = 3;

/// Tokens returned by the upstream provider after a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Providers may rotate the refresh token; `None` keeps the stored one
    pub refresh_token: Option<String>,
    pub expires: NaiveDateTime,
}

/// Client side of the token refresh flow. Implementations exchange a refresh token
/// at the upstream provider for a fresh set of credentials, returning `None` when
/// the provider no longer accepts the token.
pub trait TokenRefresher {
    fn refresh_tokens(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Option<RefreshedTokens>> + Send;
}

#[derive(Clone)]
pub struct Database(Arc<Pool<AsyncPgConnection>>);

impl Database {
    pub async fn connect() -> Result<Self> {
        Self::connect_with_url(tether_config::database_url()).await
    }

    pub async fn connect_with_url(database_url: &str) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config).build()?;

        let mut conn = pool.get().await?;
        migrations::run_migrations(&mut conn).await?;

        Ok(Self(Arc::new(pool)))
    }

    // User operations

    pub async fn get_user(&self, user_id: impl AsRef<str>) -> Result<User> {
        use schema::user::dsl::*;

        let mut connection = self.0.get().await?;
        let result = user
            .filter(id.eq(user_id.as_ref()))
            .select(User::as_select())
            .first(&mut connection)
            .await?;

        Ok(result)
    }

    pub async fn create_user(
        &self,
        user_id: impl AsRef<str>,
        _device_name: impl AsRef<str>,
    ) -> Result<User> {
        use schema::user::dsl::*;

        let mut connection = self.0.get().await?;
        let result = diesel::insert_into(user)
            .values((
                id.eq(user_id.as_ref()),
                device_name.eq(_device_name.as_ref()),
            ))
            .returning(User::as_returning())
            .get_result(&mut connection)
            .await?;

        Ok(result)
    }

    pub async fn get_or_create_user(
        &self,
        user_id: impl AsRef<str>,
        device_name: impl AsRef<str>,
    ) -> Result<User> {
        match self.get_user(&user_id).await.optional()? {
            Some(existing) => Ok(existing),
            None => self.create_user(user_id, device_name).await,
        }
    }

    pub async fn update_device_name(
        &self,
        user_id: impl AsRef<str>,
        _device_name: impl AsRef<str>,
    ) -> Result<()> {
        use schema::user::dsl::*;

        let mut connection = self.0.get().await?;
        diesel::update(user)
            .filter(id.eq(user_id.as_ref()))
            .set(device_name.eq(_device_name.as_ref()))
            .execute(&mut connection)
            .await?;

        Ok(())
    }

    /// Delete a user. The account and any link requests owned by the user are
    /// removed along with it through `ON DELETE CASCADE`, so no dependent rows
    /// survive the delete.
    pub async fn delete_user(&self, user_id: impl AsRef<str>) -> Result<usize> {
        use schema::user::dsl::*;

        let mut connection = self.0.get().await?;
        let affected = diesel::delete(user)
            .filter(id.eq(user_id.as_ref()))
            .execute(&mut connection)
            .await?;

        Ok(affected)
    }

    // Account operations

    pub async fn get_account(&self, _user_id: impl AsRef<str>) -> Result<Account> {
        use schema::account::dsl::*;

        let mut connection = self.0.get().await?;
        let result = account
            .select(Account::as_select())
            .filter(user_id.eq(_user_id.as_ref()))
            .first(&mut connection)
            .await?;

        Ok(result)
    }

    /// Create or replace a user's account in a single atomic write
    pub async fn upsert_account(
        &self,
        _user_id: impl AsRef<str>,
        _username: impl AsRef<str>,
        _access_token: impl AsRef<str>,
        _refresh_token: impl AsRef<str>,
        _session_token: Option<&str>,
        _expires: NaiveDateTime,
    ) -> Result<Account> {
        use schema::account::dsl::*;

        let mut connection = self.0.get().await?;
        let _last_updated = Utc::now().naive_utc();

        let result = diesel::insert_into(account)
            .values((
                user_id.eq(_user_id.as_ref()),
                username.eq(_username.as_ref()),
                access_token.eq(_access_token.as_ref()),
                refresh_token.eq(_refresh_token.as_ref()),
                session_token.eq(_session_token),
                expires.eq(_expires),
                last_updated.eq(_last_updated),
            ))
            .on_conflict(user_id)
            .do_update()
            .set((
                username.eq(_username.as_ref()),
                access_token.eq(_access_token.as_ref()),
                refresh_token.eq(_refresh_token.as_ref()),
                session_token.eq(_session_token),
                expires.eq(_expires),
                last_updated.eq(_last_updated),
            ))
            .returning(Account::as_returning())
            .get_result(&mut connection)
            .await;

        match result {
            Err(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::ForeignKeyViolation,
                _,
            )) => Err(DatabaseError::NotFound),
            other => Ok(other?),
        }
    }

    /// Replace the stored tokens of a user's account. `_expires` refers to the new
    /// access token. All token fields, the expiry and `last_updated` are written in
    /// one statement, so concurrent readers never observe a partially refreshed
    /// account.
    pub async fn refresh_account_tokens(
        &self,
        _user_id: impl AsRef<str>,
        _access_token: impl AsRef<str>,
        _refresh_token: impl AsRef<str>,
        _expires: NaiveDateTime,
    ) -> Result<Account> {
        use schema::account::dsl::*;

        let mut connection = self.0.get().await?;
        let result = diesel::update(account)
            .filter(user_id.eq(_user_id.as_ref()))
            .set((
                access_token.eq(_access_token.as_ref()),
                refresh_token.eq(_refresh_token.as_ref()),
                expires.eq(_expires),
                last_updated.eq(Utc::now().naive_utc()),
            ))
            .returning(Account::as_returning())
            .get_result(&mut connection)
            .await?;

        Ok(result)
    }

    pub async fn update_session_token(
        &self,
        _user_id: impl AsRef<str>,
        _session_token: Option<&str>,
    ) -> Result<()> {
        use schema::account::dsl::*;

        let mut connection = self.0.get().await?;
        diesel::update(account)
            .filter(user_id.eq(_user_id.as_ref()))
            .set(session_token.eq(_session_token))
            .execute(&mut connection)
            .await?;

        Ok(())
    }

    pub async fn is_account_expired(&self, user_id: impl AsRef<str>) -> Result<bool> {
        Ok(self.get_account(user_id).await?.expired())
    }

    /// Remove a user's account without touching the user itself
    pub async fn delete_account(&self, _user_id: impl AsRef<str>) -> Result<usize> {
        use schema::account::dsl::*;

        let mut connection = self.0.get().await?;
        let affected = diesel::delete(account)
            .filter(user_id.eq(_user_id.as_ref()))
            .execute(&mut connection)
            .await?;

        Ok(affected)
    }

    // Request operations

    /// Create a new link request that expires after `tether_config::LINK_REQUEST_EXPIRY`
    /// seconds. A user may hold several pending requests at once.
    ///
    /// Token collisions are astronomically rare, but should one happen the insert is
    /// retried with a freshly generated token.
    pub async fn create_link_request(&self, _user_id: impl AsRef<str>) -> Result<LinkRequest> {
        use schema::link_request::dsl::*;

        let mut connection = self.0.get().await?;
        let _expires = (Utc::now()
            + Duration::seconds(tether_config::LINK_REQUEST_EXPIRY as i64))
        .naive_utc();

        let mut attempts = 0;
        loop {
            let _token = generate_token();
            let result = diesel::insert_into(link_request)
                .values((
                    token.eq(&_token),
                    user_id.eq(_user_id.as_ref()),
                    expires.eq(_expires),
                ))
                .returning(LinkRequest::as_returning())
                .get_result(&mut connection)
                .await;

            match result {
                Err(diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    _,
                )) if attempts < TOKEN_COLLISION_RETRIES => attempts += 1,
                Err(diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::ForeignKeyViolation,
                    _,
                )) => return Err(DatabaseError::NotFound),
                other => return Ok(other?),
            }
        }
    }

    /// Look up a link request by its token without consuming it
    pub async fn resolve_link_request(&self, _token: impl AsRef<str>) -> Result<LinkRequest> {
        use schema::link_request::dsl::*;

        let mut connection = self.0.get().await?;
        let request: LinkRequest = link_request
            .filter(token.eq(_token.as_ref()))
            .select(LinkRequest::as_select())
            .first(&mut connection)
            .await?;

        if request.expired() {
            return Err(DatabaseError::Expired);
        }

        Ok(request)
    }

    /// Resolve a link request and consume it within the same transaction, so every
    /// token completes at most one link. Returns the id of the user that created
    /// the request.
    pub async fn claim_link_request(&self, _token: impl AsRef<str>) -> Result<String> {
        use schema::link_request::dsl::*;

        let mut connection = self.0.get().await?;
        let _token = _token.as_ref().to_string();
        let _now = Utc::now().naive_utc();

        connection
            .transaction::<_, DatabaseError, _>(|connection| {
                async move {
                    let request: LinkRequest = link_request
                        .filter(token.eq(&_token))
                        .select(LinkRequest::as_select())
                        .first(connection)
                        .await?;

                    if request.expired_at(_now) {
                        return Err(DatabaseError::Expired);
                    }

                    diesel::delete(link_request)
                        .filter(token.eq(&_token))
                        .execute(connection)
                        .await?;

                    Ok(request.user_id)
                }
                .scope_boxed()
            })
            .await
    }

    /// Delete every link request that expired at or before `_now`, returning how
    /// many were removed. Idempotent, safe to run repeatedly or concurrently.
    pub async fn sweep_expired_link_requests(&self, _now: NaiveDateTime) -> Result<usize> {
        use schema::link_request::dsl::*;

        let mut connection = self.0.get().await?;
        let affected = diesel::delete(link_request)
            .filter(expires.le(_now))
            .execute(&mut connection)
            .await?;

        Ok(affected)
    }

    // Special operations

    /// Retrieve a user's access token. If the token has expired, or is about to, it
    /// is exchanged through `refresher` and the stored account is updated before
    /// the new token is returned.
    ///
    /// When the provider rejects the stored refresh token the account is deleted,
    /// as its credentials can never become valid again.
    pub async fn get_access_token(
        &self,
        _user_id: impl AsRef<str>,
        refresher: &impl TokenRefresher,
    ) -> Result<String> {
        let account = self.get_account(&_user_id).await?;

        if !account.expired_offset(Duration::seconds(tether_config::TOKEN_EXPIRY_MARGIN as i64)) {
            return Ok(account.access_token);
        }

        let Some(tokens) = refresher.refresh_tokens(&account.refresh_token).await else {
            self.delete_account(&_user_id).await.ok();

            return Err(DatabaseError::RefreshTokenFailure);
        };

        let account = self
            .refresh_account_tokens(
                &_user_id,
                &tokens.access_token,
                tokens
                    .refresh_token
                    .as_deref()
                    .unwrap_or(&account.refresh_token),
                tokens.expires,
            )
            .await?;

        Ok(account.access_token)
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LINK_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_opaque_and_unique() {
        let first = generate_token();
        let second = generate_token();

        assert_eq!(first.len(), LINK_TOKEN_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }
}
