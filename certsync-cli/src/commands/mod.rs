pub mod adapters;
pub mod check_config;
pub mod run;
