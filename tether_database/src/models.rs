use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = super::schema::user)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: String,
    pub device_name: String,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = super::schema::account)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Account {
    pub user_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub session_token: Option<String>,
    pub expires: NaiveDateTime,
    pub last_updated: NaiveDateTime,
}

impl Account {
    pub fn expired(&self) -> bool {
        self.expired_at(Utc::now().naive_utc())
    }

    /// Whether the access token had expired at `now`. The boundary is inclusive: a
    /// token is no longer valid at the exact moment `expires` is reached.
    pub fn expired_at(&self, now: NaiveDateTime) -> bool {
        now >= self.expires
    }

    /// Whether the access token is expired, or will be within `offset`
    pub fn expired_offset(&self, offset: chrono::Duration) -> bool {
        Utc::now().naive_utc() >= self.expires - offset
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = super::schema::link_request)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LinkRequest {
    pub token: String,
    pub user_id: String,
    pub expires: NaiveDateTime,
}

impl LinkRequest {
    pub fn expired(&self) -> bool {
        self.expired_at(Utc::now().naive_utc())
    }

    pub fn expired_at(&self, now: NaiveDateTime) -> bool {
        now >= self.expires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account_expiring_at(expires: NaiveDateTime) -> Account {
        Account {
            user_id: "123456789".into(),
            username: "alice".into(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            session_token: None,
            expires,
            last_updated: expires - Duration::hours(1),
        }
    }

    #[test]
    fn account_expiry_boundary_is_inclusive() {
        let expires = Utc::now().naive_utc();
        let account = account_expiring_at(expires);

        assert!(!account.expired_at(expires - Duration::seconds(1)));
        assert!(account.expired_at(expires));
        assert!(account.expired_at(expires + Duration::seconds(1)));
    }

    #[test]
    fn account_expired_offset_reports_imminent_expiry() {
        let account = account_expiring_at(Utc::now().naive_utc() + Duration::seconds(30));

        assert!(!account.expired());
        assert!(account.expired_offset(Duration::seconds(60)));
    }

    #[test]
    fn link_request_expiry_boundary_is_inclusive() {
        let expires = Utc::now().naive_utc();
        let request = LinkRequest {
            token: "token".into(),
            user_id: "123456789".into(),
            expires,
        };

        assert!(!request.expired_at(expires - Duration::seconds(1)));
        assert!(request.expired_at(expires));
        assert!(request.expired_at(expires + Duration::minutes(10)));
    }
}
