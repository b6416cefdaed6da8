pub mod config;
pub mod job;
pub mod lifecycle;
pub mod recover;
pub mod run;
