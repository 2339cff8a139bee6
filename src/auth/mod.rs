//! Cookie-level authentication helpers shared by the gate, the bootstrap
//! endpoint and the backend proxy.
//!
//! The edge never validates credentials itself: it reads them from cookies,
//! judges access-token expiry locally, and lets the backend be the authority.

mod cookie;
mod ip;
mod reason;
mod return_path;

pub use cookie::{
    ACCESS_COOKIE_NAME, AUTH_REASON_COOKIE_NAME, AUTH_REASON_MAX_AGE, EdgeCookies,
    REFRESH_COOKIE_NAME, RETURN_PATH_COOKIE_NAME, RETURN_PATH_MAX_AGE, append_set_cookies,
    get_cookie, replace_cookie_value, without_cookie,
};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use reason::{AuthReason, MAX_ENCODED_LEN as MAX_AUTH_REASON_LEN, is_valid_encoding};
pub use return_path::{
    MAX_RETURN_PATH_LEN, decode_return_path, encode_return_path, is_internal_path,
    sanitize_internal_path,
};
