pub mod naming;
pub mod receipt_files;
