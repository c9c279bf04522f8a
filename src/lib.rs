pub mod catalog;
pub mod config;
pub mod detect;
pub mod model;
pub mod palette;
pub mod stream;

#[cfg(test)]
mod testing;
