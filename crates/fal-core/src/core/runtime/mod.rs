//! Model execution: archives, environment provisioning, backend dispatch,
//! and the remote clients.

pub mod archive;
pub mod commands;
pub mod deps;
pub mod dispatch;
pub mod effects;
pub mod isolate;
pub mod koldstart;
pub mod local;
pub mod process;
pub mod runner;
