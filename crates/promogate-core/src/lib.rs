pub mod checks_api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod model;
pub mod registry;
pub mod rollback;
pub mod stages;
pub mod storage;
pub mod window;
