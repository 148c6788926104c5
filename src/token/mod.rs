//! Bearer token persistence and claim decoding.
//!
//! - [`TokenStore`]: the single owner of the stored token and its role
//! - [`TokenClaims`]: unverified view of the token's claims segment

mod claims;
mod store;

pub use claims::TokenClaims;
pub use store::TokenStore;
