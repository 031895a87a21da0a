pub mod auth;
pub mod batch;
pub mod metrics;
pub mod run;
pub mod status;
