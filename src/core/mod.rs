pub mod alerts;
pub mod clock;
pub mod config;
pub mod model;
pub mod store;
pub mod velocity;
