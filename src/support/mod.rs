pub mod numbers;
pub mod payment;
pub mod retry;
pub mod seed;
