pub mod check;
pub mod edit;
pub mod models;
pub mod probe;
