pub mod config;
pub mod recordings;
pub mod status;

pub use config::*;
pub use recordings::*;
pub use status::*;
