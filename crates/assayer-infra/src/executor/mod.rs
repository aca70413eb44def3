//! Domain executor adapters.

pub mod process;

pub use process::ProcessDomainExecutor;
