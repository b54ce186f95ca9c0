pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{scripted_cow, ScriptedBackend};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
