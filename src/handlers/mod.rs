pub mod alerts;
pub mod correlation;
pub mod environments;
pub mod incidents;
