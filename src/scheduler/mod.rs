pub mod deps;
pub mod dispatcher;
pub mod job;

pub use dispatcher::Dispatcher;
pub use job::{JobState, Settings};
