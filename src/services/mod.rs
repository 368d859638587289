//! Upstream API clients

pub mod ace_step;
pub mod llm;
