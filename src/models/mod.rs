pub mod api;
pub mod job;
pub mod status;
pub mod template;
