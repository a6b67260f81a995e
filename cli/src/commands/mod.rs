//! Command implementations

pub mod check;
pub mod matching;
pub mod run;
pub mod version;
