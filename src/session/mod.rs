pub mod error;
pub mod manager;
pub(crate) mod path;
#[allow(clippy::module_inception)]
pub mod session;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use manager::SessionManager;
pub use session::Session;
pub use types::{
    ManagerConfig, PathStats, SessionConfig, SessionState, DEFAULT_CLOSE_GRACE, MAX_PATHS,
    UNASSIGNED_SESSION_ID,
};
