pub mod alert;
pub mod correlation;
pub mod environment;
pub mod log;

pub use alert::*;
pub use correlation::*;
pub use environment::*;
pub use log::*;
