pub mod image_types;
pub mod operations;
pub mod processing;
pub mod validation;
