//! `stockroom-auth`: identity boundary.
//!
//! Resolves who is acting. This crate is decoupled from HTTP and storage:
//! the API turns a bearer token into an [`Identity`], and the core receives
//! that identity as an explicit argument on every attributed operation.

pub mod claims;
pub mod identity;
pub mod jwt;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use identity::{Identity, IdentityListener, IdentityProvider, SessionIdentityProvider};
pub use jwt::{Hs256JwtValidator, JwtValidator};
