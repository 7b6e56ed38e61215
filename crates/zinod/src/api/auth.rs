//! Challenge-response authentication for the command protocol.
//!
//! On connect the server issues a 40-hex-character challenge; the client
//! proves knowledge of the user's secret by answering
//! `SHA1(challenge + " " + secret)` in lowercase hex. Unknown users take
//! the same code path as wrong passwords, so the failure mode is
//! indistinguishable.

use std::collections::HashMap;

use rand::RngCore;
use sha1::{Digest, Sha1};

/// Raised on any failed authentication attempt.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthenticationFailure;

impl std::fmt::Display for AuthenticationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Authentication failure")
    }
}

impl std::error::Error for AuthenticationFailure {}

/// Returns a fresh authentication challenge (also used as notify nonces).
pub fn generate_challenge() -> String {
    let mut entropy = [0u8; 40];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    format!("{:x}", Sha1::digest(entropy))
}

/// The response a client must give for `challenge` and `secret`.
pub fn expected_response(challenge: &str, secret: &str) -> String {
    format!("{:x}", Sha1::digest(format!("{challenge} {secret}").as_bytes()))
}

/// Verifies a challenge response against the users database.
pub fn authenticate(
    users: &HashMap<String, String>,
    user: &str,
    response: &str,
    challenge: &str,
) -> Result<(), AuthenticationFailure> {
    // Unknown users get a dummy verification so both failures look alike.
    let secret = users.get(user).map(String::as_str).unwrap_or("");
    let expected = expected_response(challenge, secret);
    if users.contains_key(user) && response.eq_ignore_ascii_case(&expected) {
        Ok(())
    } else {
        Err(AuthenticationFailure)
    }
}
