//! Status reporting for front ends.

pub mod reporter;
