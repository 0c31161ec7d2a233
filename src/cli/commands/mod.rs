//! CLI command implementations.

mod config;
mod doctor;
mod list;
mod serve;
mod status;
mod sweep;

pub use config::run_config;
pub use doctor::run_doctor;
pub use list::run_list;
pub use serve::run_serve;
pub use status::run_status;
pub use sweep::run_sweep;
