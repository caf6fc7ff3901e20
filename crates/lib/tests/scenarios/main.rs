mod common;

mod cleanup_tests;
mod file_tests;
mod hook_tests;
mod option_tests;
mod ordering_tests;
