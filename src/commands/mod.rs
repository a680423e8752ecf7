pub mod daemon;
pub mod output;
pub mod serve;
pub mod tool;
pub mod utils;

#[cfg(test)]
#[path = "../commands_test.rs"]
mod commands_test;
