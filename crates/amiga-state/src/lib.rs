pub mod auth;
pub mod db;
pub mod engine;
pub mod seed;

pub use auth::{Argon2Authenticator, Authenticator};
pub use db::StateDb;
pub use engine::CycleEngine;
pub use seed::ensure_admin_seed;
