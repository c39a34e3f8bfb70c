pub mod events;
pub mod generate;
pub mod leader;
pub mod state;
pub mod tasks;
