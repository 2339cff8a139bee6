pub mod backend;
pub mod forward;
pub mod refresh;
pub mod set_cookie;

pub use backend::BackendConfig;
pub use forward::{ProxyState, ReplayableBody, router};
pub use refresh::{
    REQUEST_ID_HEADER, RefreshContext, RefreshCoordinator, RefreshIdentity, RefreshOutcome,
};
pub use set_cookie::{rewrite_all, rewrite_set_cookie};
