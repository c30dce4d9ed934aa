pub mod repository;
pub mod types;

pub use repository::{SqliteWorkoutRepository, WorkoutRepository};
pub use types::{NewWorkout, Workout};
