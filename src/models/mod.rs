pub mod api;
pub mod booking;
pub mod job;
pub mod queue_item;
pub mod search;
