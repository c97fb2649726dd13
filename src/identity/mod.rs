//! Authentication session for the billing client.
//! The session state has a single writer (`AuthSessionManager`, plus the sign-out trigger it
//! hands to the gateway); everything else observes it through `SessionView`.

mod session;
mod store;
mod manager;
pub mod forms;

pub use session::{Credential, SessionState, SessionView, SignOutTrigger};
pub use store::{SessionStore, StoredSession, FileSessionStore, MemorySessionStore};
pub use manager::AuthSessionManager;
pub use forms::{LoginForm, RegisterForm, UploadReadingForm, ValidationError};
