pub mod claims;
pub mod token;

pub use claims::{Role, TokenClaims};
pub use token::AuthError;
