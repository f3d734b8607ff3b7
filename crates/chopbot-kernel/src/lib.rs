pub mod directive;
pub mod menu;
pub mod order;
pub mod prompt;
pub mod structured;
