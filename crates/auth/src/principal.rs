use tally_core::LedgerId;

use crate::claims::TokenClaims;

/// The authenticated caller, reduced to what the write path consumes.
///
/// The auth layer is authoritative: by the time a `Principal` exists, the
/// credential has been verified for this ledger. The core never re-checks it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Principal {
    ledger_id: LedgerId,
}

impl Principal {
    pub fn new(ledger_id: LedgerId) -> Self {
        Self { ledger_id }
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }
}

impl From<&TokenClaims> for Principal {
    fn from(claims: &TokenClaims) -> Self {
        Self::new(claims.ledger_id)
    }
}
