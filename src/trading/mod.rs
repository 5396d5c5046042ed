pub mod http;
pub mod model;
pub mod services;
pub mod store;
pub mod workflow;
