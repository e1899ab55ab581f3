pub mod breaker;
pub mod filter;
pub mod redis;
pub mod settings;
