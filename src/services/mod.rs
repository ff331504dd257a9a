pub mod broker;
pub mod status;
pub mod submitter;
pub mod worker;
