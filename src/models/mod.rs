pub mod audit;
pub mod decision;
pub mod delegation;
pub mod request;
pub mod workflow;
