pub mod follow_up;
pub mod pending_poller;
pub mod webhook_retry;
