//! Utility modules

pub mod ids;
pub mod rate_limit;
pub mod shutdown;
pub mod time;
