//! Password storage as `hex(hash).hex(salt)`: 16 random salt bytes and a
//! 64-byte Argon2id output.

use std::sync::LazyLock;

use argon2::password_hash::Output;
use argon2::{Algorithm, Argon2, Params, Version};

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 64;

/// Hash of a throwaway password, verified against when the user does not
/// exist so that both login failures do the same work.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("not-a-real-password").unwrap_or_default());

fn argon2() -> Result<Argon2<'static>, argon2::Error> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        Params::DEFAULT_T_COST,
        Params::DEFAULT_P_COST,
        Some(HASH_LEN),
    )?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], argon2::Error> {
    let mut out = [0u8; HASH_LEN];
    argon2()?.hash_password_into(password.as_bytes(), salt, &mut out)?;
    Ok(out)
}

pub fn hash_password(password: &str) -> Result<String, argon2::Error> {
    let salt: [u8; SALT_LEN] = rand::random();
    let hash = derive(password, &salt)?;
    Ok(format!("{}.{}", hex::encode(hash), hex::encode(salt)))
}

/// Constant-time check of `password` against a stored `hash.salt` value.
/// Malformed stored values never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((hash_hex, salt_hex)) = stored.split_once('.') else {
        return false;
    };
    let (Ok(expected), Ok(salt)) = (hex::decode(hash_hex), hex::decode(salt_hex)) else {
        return false;
    };
    if expected.len() != HASH_LEN {
        return false;
    }
    let Ok(actual) = derive(password, &salt) else {
        return false;
    };
    match (Output::new(&expected), Output::new(&actual)) {
        (Ok(expected), Ok(actual)) => expected == actual,
        _ => false,
    }
}

/// Burn the same work as a real verification. Always false.
pub fn verify_dummy(password: &str) -> bool {
    verify_password(password, &DUMMY_HASH);
    false
}
