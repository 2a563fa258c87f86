pub mod auth_service;
pub mod identity_service;
pub mod storage_service;

pub use identity_service::{Identity, IdentityResolver, JwtIdentityResolver};
pub use storage_service::{FileStore, LocalFileStore, ResolvedFile};
