pub mod args;
pub mod probe;
pub mod simulate;
