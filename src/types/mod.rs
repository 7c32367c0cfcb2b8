pub mod symbol;
pub mod bar;
pub mod prediction;

pub use symbol::*;
pub use bar::*;
pub use prediction::*;
