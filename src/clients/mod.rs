pub mod certificates;
pub mod secrets;
pub mod smtp;
pub mod specification;
pub mod template;
