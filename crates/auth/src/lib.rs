//! Principal resolution: bearer-token validation reduced to a ledger scope.
//!
//! Key issuance, rotation, and revocation live outside this service; what
//! arrives here is a signed token, and what leaves is a [`Principal`] that
//! names exactly one ledger. The core write path consumes nothing else.

mod claims;
mod principal;

pub use claims::{
    validate_claims, Hs256TokenValidator, TokenClaims, TokenValidationError, TokenValidator,
};
pub use principal::Principal;
