//! Password challenge/response.
//!
//! Each side sends a random challenge; the answer is
//! `SHA-256(challenge ‖ SHA-256(password))`. The password itself never
//! crosses the wire and answers are compared in constant time.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::protocol::CHALLENGE_LEN;

pub type Challenge = [u8; CHALLENGE_LEN];
pub type Solution = [u8; 32];

pub fn hash_password(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

pub fn generate_challenge() -> Challenge {
    let mut c = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut c);
    c
}

pub fn solve_challenge(challenge: &Challenge, password_hash: &[u8; 32]) -> Solution {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(password_hash);
    hasher.finalize().into()
}

/// Equality whose running time depends only on the length of the inputs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}

/// One side of the exchange: the challenge we sent and the answer we expect.
pub struct Authenticator {
    password_hash: [u8; 32],
    challenge: Challenge,
}

impl Authenticator {
    pub fn new(password: &str) -> Self {
        Self::with_challenge(password, generate_challenge())
    }

    pub fn with_challenge(password: &str, challenge: Challenge) -> Self {
        Self {
            password_hash: hash_password(password),
            challenge,
        }
    }

    pub fn challenge(&self) -> Challenge {
        self.challenge
    }

    /// Answer for the peer's challenge.
    pub fn answer(&self, peer_challenge: &Challenge) -> Solution {
        solve_challenge(peer_challenge, &self.password_hash)
    }

    /// Whether the peer's answer to our challenge proves the same password.
    pub fn verify(&self, peer_solution: &Solution) -> bool {
        let expected = solve_challenge(&self.challenge, &self.password_hash);
        constant_time_eq(&expected, peer_solution)
    }
}
