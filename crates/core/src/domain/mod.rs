pub mod candidate;
pub mod extension;
pub mod signature;
pub mod workflow;
