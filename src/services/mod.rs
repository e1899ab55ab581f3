pub mod bloom;
pub mod circuit_breaker;
pub mod dedup;
pub mod metrics;
pub mod storage;
