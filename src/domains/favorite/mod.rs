pub mod repository;
pub mod types;

pub use repository::{FavoriteRepository, SqliteFavoriteRepository};
pub use types::Favorite;
