pub mod error;
pub mod middleware;
pub mod resolver;
pub mod token;

pub use error::AuthError;
