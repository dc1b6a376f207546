//! Request-level services shared by the controller handlers.

mod validation;
pub use validation::RequestValidator;
