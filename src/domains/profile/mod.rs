pub mod repository;
pub mod types;

pub use repository::{ProfileRepository, SqliteProfileRepository};
pub use types::Profile;
