pub mod repository;
pub mod types;

pub use repository::{SqliteWorkoutSetRepository, WorkoutSetRepository};
pub use types::{NewWorkoutSet, WorkoutSet};
