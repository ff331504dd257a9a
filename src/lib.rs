//! Booking and search job pipeline
//!
//! This library moves slow, failure-prone work (placing a booking, running a
//! search) off the request path: the API persists Job/Task/Result rows and
//! publishes a message, and independent worker processes consume, dispatch
//! and record outcomes.

pub mod app_state;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
