// Shared helpers for browser actions and configuration checks
pub mod constants;
mod timeout;
mod wait_for_element;

pub use timeout::{duration_ms, validate_interaction_timeout, validate_navigation_timeout};
pub use wait_for_element::wait_for_element;
