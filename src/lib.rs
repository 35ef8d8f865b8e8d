pub mod constants;
pub mod driver;
pub mod errors;
pub mod messages;
pub mod nodes;
pub mod runtime;
pub mod transport;
pub mod types;
