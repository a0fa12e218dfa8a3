//! Services layer for c360-auth.
//!
//! Business logic for credentials, sessions and company administration,
//! plus the storage, cache and email seams it depends on.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod company;
mod database;
mod email;
pub mod error;
pub mod keys;
pub mod memory;
pub mod store;
pub mod tokens;

pub use auth::AuthService;
pub use cache::{KeyValueCache, MockCache, RedisService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use company::CompanyService;
pub use database::Database;
pub use email::{EmailKind, EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use keys::{FileKeySource, Jwks, KeySource, StaticKeySource};
pub use memory::InMemoryStore;
pub use store::AuthStore;
pub use tokens::{AccessClaims, TokenService};
