//! Authentication (C9): EIP-191 personal-sign challenges and short-lived, symmetric-signed
//! bearer tokens scoped to `(contract, game)` (§4.9).

use ethers::types::{Address, Signature, U256};
use ethers::utils::to_checksum;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AuthError;

/// The challenge is valid for this long after it was issued (§4.9).
pub const CHALLENGE_VALIDITY_SECS: i64 = 5 * 60;
/// Bearer tokens are valid for this long after they are minted (§3, §4.9).
pub const TOKEN_VALIDITY_SECS: i64 = 60 * 60;

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Builds the fixed-template EIP-191 challenge message (§4.9). `timestamp_ms` is echoed
/// back verbatim by the client on `POST /register`, so the server reconstructs the exact
/// same message to verify against rather than storing per-challenge state.
pub fn build_challenge_message(contract: Address, game_id: U256, timestamp_ms: i64) -> String {
    format!(
        "Sign this message to authenticate with the game server.\n\n\
         Contract: {}\n\
         GameId: {}\n\
         Namespace: ScriptGame\n\
         Timestamp: {}\n\n\
         This signature is valid for 5 minutes.",
        to_checksum(&contract, None),
        game_id,
        timestamp_ms
    )
}

/// Recovers the signer of `message` from `signature` and requires it to equal `claimed`
/// (case-insensitive). Does not check player membership — that is the session's job.
pub fn recover_and_verify(
    message: &str,
    signature_hex: &str,
    claimed: Address,
) -> Result<(), AuthError> {
    let sig_hex = signature_hex.trim_start_matches("0x");
    let sig_bytes =
        hex::decode(sig_hex).map_err(|e| AuthError::SignatureVerification(e.to_string()))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| AuthError::SignatureVerification(e.to_string()))?;

    let recovered = signature
        .recover(message)
        .map_err(|e| AuthError::SignatureVerification(e.to_string()))?;

    if recovered != claimed {
        return Err(AuthError::SignatureVerification(
            "recovered address does not match claimed address".to_string(),
        ));
    }
    Ok(())
}

/// Checks the challenge's timestamp is within its validity window relative to `now_ms`.
pub fn challenge_is_fresh(timestamp_ms: i64, now_ms: i64) -> bool {
    let age_secs = (now_ms - timestamp_ms) / 1000;
    (0..=CHALLENGE_VALIDITY_SECS).contains(&age_secs)
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "issuedAt")]
    issued_at: i64,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub address: Address,
    pub issued_at: i64,
}

/// Mints an HS256 JWT carrying `{address, issuedAt}`, keyed by the per-contract token
/// secret (§3 `BASE ∥ "-" ∥ contract_address_lower`).
pub fn mint_token(secret: &str, address: Address, now_ms: i64) -> Result<String, AuthError> {
    let claims = Claims {
        sub: to_checksum(&address, None),
        issued_at: now_ms,
        exp: now_ms / 1000 + TOKEN_VALIDITY_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::SignatureVerification(e.to_string()))
}

/// Validates a bearer token's signature and expiry, returning the embedded address. Player
/// membership is re-checked by the caller against the game's current player set (§4.9).
pub fn verify_token(secret: &str, token: &str) -> Result<TokenPayload, AuthError> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AuthError::InvalidToken)?;

    let address = Address::from_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)?;
    Ok(TokenPayload {
        address,
        issued_at: data.claims.issued_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};

    #[tokio::test]
    async fn challenge_round_trips_through_a_real_signature() {
        let wallet = LocalWallet::from_str(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let address = wallet.address();
        let contract = Address::from_low_u64_be(0xC0FFEE);
        let game_id = U256::from(7u64);
        let ts = now_millis();

        let message = build_challenge_message(contract, game_id, ts);
        let signature = wallet.sign_message(&message).await.unwrap();
        let sig_hex = format!("0x{}", hex::encode(signature.to_vec()));

        assert!(recover_and_verify(&message, &sig_hex, address).is_ok());
        assert!(challenge_is_fresh(ts, ts + 1000));
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let message = "not even close to a real signature";
        let bogus_sig = "0x".to_string() + &"00".repeat(65);
        let addr = Address::zero();
        assert!(recover_and_verify(message, &bogus_sig, addr).is_err());
    }

    #[test]
    fn stale_challenge_is_rejected() {
        let issued = 0;
        let now = (CHALLENGE_VALIDITY_SECS + 10) * 1000;
        assert!(!challenge_is_fresh(issued, now));
    }

    #[test]
    fn token_round_trips_and_expires_in_one_hour() {
        let secret = "base-secret-0xdeadbeef";
        let addr = Address::from_low_u64_be(99);
        let now = now_millis();
        let token = mint_token(secret, addr, now).unwrap();
        let payload = verify_token(secret, &token).unwrap();
        assert_eq!(payload.address, addr);
        assert_eq!(payload.issued_at, now);
    }

    #[test]
    fn token_signed_with_a_different_secret_is_rejected() {
        let addr = Address::from_low_u64_be(1);
        let token = mint_token("secret-a", addr, now_millis()).unwrap();
        assert!(verify_token("secret-b", &token).is_err());
    }
}
