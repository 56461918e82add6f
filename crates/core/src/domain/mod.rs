pub mod proposal;
pub mod request;
pub mod status_log;
