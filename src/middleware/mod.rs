pub mod ip;
pub mod rate_limit;
