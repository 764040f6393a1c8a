pub mod analysis;
pub mod client;
pub mod prompt;
