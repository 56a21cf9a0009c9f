// Step commands
pub mod list;
pub mod run;
