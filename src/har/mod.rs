mod log;
mod model;

pub use log::*;
pub use model::*;
