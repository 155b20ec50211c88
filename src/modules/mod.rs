//! Builtin modules

pub mod demo;
pub mod exec;
pub mod virt;
