pub mod attempt_engine;
pub mod backend;
pub mod http_backend;
