pub mod check;

use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Check {
        route: String,
        max_attempts: u32,
        poll_interval: Duration,
    },
}
