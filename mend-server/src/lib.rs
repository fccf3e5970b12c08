pub mod dashboard;
pub mod incidents;
pub mod logging;
pub mod webhook;
