/// Account verification service
///
/// Register, login and reset-password flows driven by signed tickets and the
/// phase store, plus access-token issuance and revocation.
mod allow_list;
mod password;
mod service;

pub use allow_list::{
    load_allow_list, store_allow_list, AccessTokenEntry, AllowList, ACCESS_TOKEN_SETTING_KEY,
};
pub use password::{hash_password, validate_password, verify_password};
pub use service::AccountService;

/// Cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "sast-link-access-token";
