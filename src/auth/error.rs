use thiserror::Error;

/// Authentication failure taxonomy for connection admission.
///
/// Every variant maps to the same client-visible outcome: the connection is
/// refused with a policy-violation close. The distinction exists for logging
/// only and is never leaked to the client.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token failed to decode, had a bad signature, or is expired.
    #[error("malformed or expired token")]
    MalformedToken,

    /// Token decoded but carries no username claim.
    #[error("token missing username claim")]
    MissingClaim,

    /// The claimed username does not correspond to an existing account.
    #[error("unknown identity")]
    UnknownIdentity,

    /// The persistence collaborator could not be consulted. Fails safe:
    /// admission is refused rather than granted unverified.
    #[error("persistence error: {0}")]
    Persistence(String),
}
