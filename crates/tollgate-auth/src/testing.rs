//! Fixed RSA keypairs and a token minter for tests.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for dependents.

#![allow(clippy::missing_panics_doc)]

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use crate::key_store::VerificationKey;

/// Private half of the primary keypair (PKCS#8 PEM).
pub const PRIMARY_PRIVATE_PEM: &str = include_str!("../tests/fixtures/primary_private.pem");
/// Public half of the primary keypair (SPKI PEM).
pub const PRIMARY_PUBLIC_PEM: &str = include_str!("../tests/fixtures/primary_public.pem");
/// Private half of the rotated keypair.
pub const ROTATED_PRIVATE_PEM: &str = include_str!("../tests/fixtures/rotated_private.pem");
/// Public half of the rotated keypair.
pub const ROTATED_PUBLIC_PEM: &str = include_str!("../tests/fixtures/rotated_public.pem");

/// The primary public key as an RS256 verification key.
#[must_use]
pub fn primary_key() -> VerificationKey {
    VerificationKey::from_material(PRIMARY_PUBLIC_PEM, Algorithm::RS256)
        .expect("primary fixture key parses")
}

/// The rotated public key as an RS256 verification key.
#[must_use]
pub fn rotated_key() -> VerificationKey {
    VerificationKey::from_material(ROTATED_PUBLIC_PEM, Algorithm::RS256)
        .expect("rotated fixture key parses")
}

/// Unix timestamp `seconds` from now (negative for the past).
#[must_use]
pub fn expires_in(seconds: i64) -> i64 {
    chrono::Utc::now().timestamp() + seconds
}

/// Sign arbitrary claims with RS256 and the given private key.
#[must_use]
pub fn mint(claims: &Value, private_pem: &str) -> String {
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("fixture key parses");
    encode(&Header::new(Algorithm::RS256), claims, &key).expect("token encodes")
}

/// A one-hour token for `id`/`email` signed with the primary key.
#[must_use]
pub fn token_for(id: &str, email: &str) -> String {
    mint(
        &json!({ "id": id, "email": email, "exp": expires_in(3600) }),
        PRIMARY_PRIVATE_PEM,
    )
}
