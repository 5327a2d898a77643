mod create_modify;
mod scan;
mod types;

pub use create_modify::*;
pub use scan::*;
pub use types::*;
