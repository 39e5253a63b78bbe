pub mod certificate;
pub mod message;
pub mod retry;
pub mod specification;
pub mod status;
