mod env;

#[cfg(not(debug_assertions))]
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(debug_assertions)]
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");

/// The time it takes (in seconds) for a link request to expire after it was created
pub const LINK_REQUEST_EXPIRY: u64 = 60 * 60;

/// Access tokens within this many seconds of expiring are refreshed eagerly, so that
/// callers never end up holding a token that dies mid-use
pub const TOKEN_EXPIRY_MARGIN: u64 = 60;

pub fn database_url() -> &'static str {
    &env::DATABASE_URL
}
