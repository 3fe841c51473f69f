//! Command Signature Verification
//!
//! Administrative channel commands are signed. The signing scheme lives
//! outside the engine; it only asks whether a payload was signed by the
//! right party.

use async_trait::async_trait;

use crate::error::Result;

/// Verifies signed administrative commands.
///
/// `message` is the canonical byte encoding of the command produced by the
/// engine, so verifiers never need to know the command layout.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Check that `signature` over `message` was produced by the owner of
    /// `channel_id`.
    async fn verify_owner(&self, channel_id: &str, message: &[u8], signature: &str)
        -> Result<bool>;

    /// Check that `signature` over `message` was produced by an operator key.
    async fn verify_operator(&self, message: &[u8], signature: &str) -> Result<bool>;
}
