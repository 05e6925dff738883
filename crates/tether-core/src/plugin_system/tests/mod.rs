pub mod common;
pub mod loader_tests;
pub mod manager_tests;
