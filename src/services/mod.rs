pub mod command;
pub mod gate;
pub mod gpu;
pub mod lifecycle;
pub mod notifications;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod templates;
