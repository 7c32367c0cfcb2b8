pub mod manager;
pub mod settings;

pub use manager::*;
pub use settings::*;
