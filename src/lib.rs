#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;

pub mod analyse;
pub mod artifacts;
pub mod orchestrator;
pub mod profile;
pub mod server;
pub mod session;
pub mod types;
pub mod utils;
pub mod worklist;
