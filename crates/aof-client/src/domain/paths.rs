//! Well-known resource keys.
//!
//! Keys with a trailing dynamic part (a domain id or the segments of a source
//! URI) are joined with [`ResourceKey::join`](aof_core::ResourceKey::join).

/// Connection state mirror: `"closed" | "opening" | "open" | "closing"`.
pub const CONNECTION_STATE: &str = "aof://connection/state";
pub const CONNECTION_OPEN: &str = "aof://connection/open";
pub const CONNECTION_CLOSE: &str = "aof://connection/close";

/// Session status record mirrored by the crypto session.
pub const SESSION_STATE: &str = "aof://c_session_state";

/// Identifier under which the persisted unlock record is stored.
pub const KEY_STORE_ID: &str = "aof:key_store";

/// Name of the logged-in user, `""` once logged out.
pub const LOGIN: &str = "aof://login";
pub const LOGIN_SECRET_KEY: &str = "aof://login/secret_key";
pub const LOGIN_CLIENT_KEY: &str = "aof://login/client_key";
pub const LOGIN_CHANGE_NAME: &str = "aof://login/change_name";
pub const LOGIN_CHANGE_PASSWORD: &str = "aof://login/change_password";
pub const LOGIN_DELETE_ACCOUNT: &str = "aof://login/delete_account";

pub const DOMAINS_LIST_USER: &str = "aof://domains/list_user";
pub const DOMAINS_LIST_PUBLIC: &str = "aof://domains/list_public";
pub const DOMAIN: &str = "aof://domains/domain";
pub const DOMAIN_SCRIPT: &str = "aof://domains/domain_script";
pub const DOMAIN_CREATE: &str = "aof://domains/create";
pub const DOMAIN_UPDATE: &str = "aof://domains/update";
pub const DOMAIN_DELETE: &str = "aof://domains/delete";
pub const DOMAIN_SUBSCRIBE: &str = "aof://domains/subscribe";
pub const DOMAIN_UNSUBSCRIBE: &str = "aof://domains/unsubscribe";

pub const SOURCES_LIST_USER: &str = "aof://sources/list_user";
pub const SOURCE: &str = "aof://sources/source";
pub const SOURCE_ITEM: &str = "aof://sources/source_item";
pub const SOURCE_ITEM_DATA: &str = "aof://sources/source_item_data";
pub const SOURCE_FETCH: &str = "aof://sources/source_fetch";
pub const SOURCE_ITEM_FETCH: &str = "aof://sources/source_item_fetch";
pub const SOURCE_USER_DATA: &str = "aof://sources/source_user_data";
pub const SOURCE_ITEM_USER_DATA: &str = "aof://sources/source_item_user_data";
pub const SOURCE_SET_USER_DATA: &str = "aof://sources/source_set_user_data";
pub const SOURCE_ITEM_SET_USER_DATA: &str = "aof://sources/source_item_set_user_data";
pub const SOURCE_SUBSCRIBE: &str = "aof://sources/subscribe";
pub const SOURCE_UNSUBSCRIBE: &str = "aof://sources/unsubscribe";
pub const SOURCE_DELETE: &str = "aof://sources/delete";
pub const SOURCE_REQUEST: &str = "aof://sources/request";
pub const SOURCE_ITEM_REQUEST: &str = "aof://sources/request_item";
