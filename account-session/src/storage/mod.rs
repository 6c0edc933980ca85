//! Secure keyed storage and typed session persistence.

pub mod encrypted_file;
pub mod keyed;
pub mod record;
pub mod session_store;

pub use encrypted_file::EncryptedFileStore;
pub use keyed::{SecureKeyedStore, check_namespace};
pub use record::{RECORD_VERSION, SessionRecord, TokenBundle};
pub use session_store::SessionStore;
