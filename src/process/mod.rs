// src/process/mod.rs
//! Pure transformations: landed rows in, typed records and quality counts out.

pub mod crime;
pub mod date_parser;
pub mod fill;
pub mod flatten;
pub mod integrate;
pub mod raw_table;
pub mod region;
pub mod utils;
