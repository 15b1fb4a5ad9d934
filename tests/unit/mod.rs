//! Integration tests, compiled as a single `tests` target.

mod common;

mod actor_tests;
mod file_channel_tests;
mod payload_tests;
mod queue_tests;
mod recovery_tests;
