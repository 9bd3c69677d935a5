//! Cryptographic building blocks: deterministic password derivation and
//! random secret generation.

pub mod derive;
pub mod secrets;
