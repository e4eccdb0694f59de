pub mod controller;
pub mod quest;

pub use controller::QuestController;
pub use quest::{QuestHandler, QuestSettings};
