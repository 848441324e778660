pub mod generator;
pub mod grid;
pub mod observer;
pub mod resolver;
pub mod summary;
