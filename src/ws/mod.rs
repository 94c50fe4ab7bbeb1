pub mod actor;
pub mod handler;
pub mod protocol;

/// Close code used for every authentication failure on admission.
/// One indistinguishable policy-violation signal regardless of cause.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
