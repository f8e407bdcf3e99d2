#[cfg(feature = "llama")]
pub mod native;
