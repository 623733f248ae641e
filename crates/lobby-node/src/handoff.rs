//! Signed, time-boxed credentials.
//!
//! Tokens are compact JWS (`header.claims.signature`, HS256) so execution nodes can
//! verify them with any standard JWT library given the shared secret. The same
//! signer verifies the lobby tokens clients present when they connect.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use lobby_core::game::{AssignedNode, GameSession, Member};
use lobby_core::net::messages::HandOffMsg;
use lobby_core::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Audience claim of hand-off credentials.
pub const HANDOFF_AUDIENCE: &str = "game";
/// Audience claim of lobby connection tokens.
pub const LOBBY_AUDIENCE: &str = "lobby";

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    NotYetValid,
    WrongIssuer,
    WrongAudience,
    Encode(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed token"),
            Self::BadSignature => write!(f, "token signature mismatch"),
            Self::Expired => write!(f, "token expired"),
            Self::NotYetValid => write!(f, "token not yet valid"),
            Self::WrongIssuer => write!(f, "token issuer mismatch"),
            Self::WrongAudience => write!(f, "token audience mismatch"),
            Self::Encode(e) => write!(f, "failed to encode token: {e}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Registered claims wrapped around an application claim set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims<T> {
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub nbf: u64,
    pub exp: u64,
    #[serde(flatten)]
    pub body: T,
}

/// Claims carried by a hand-off credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandOffClaims {
    pub name: String,
    #[serde(rename = "gameId")]
    pub game_id: String,
}

/// Claims a client presents to identify itself to the lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyClaims {
    pub name: String,
    #[serde(rename = "blockList", default)]
    pub block_list: Vec<String>,
    #[serde(rename = "userData", default)]
    pub user_data: String,
}

/// HS256 signer/verifier bound to one secret and issuer.
pub struct TokenSigner {
    key: Vec<u8>,
    issuer: String,
}

impl TokenSigner {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Sign `body` for `audience`, valid from now for `ttl`.
    pub fn sign<T: Serialize>(
        &self,
        body: T,
        audience: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = unix_millis() / 1000;
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: audience.to_string(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl.as_secs()),
            body,
        };
        let payload =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Encode(e.to_string()))?;

        let mut token = URL_SAFE_NO_PAD.encode(HEADER);
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(payload));

        let mut mac = self.mac()?;
        mac.update(token.as_bytes());
        let signature = mac.finalize().into_bytes();
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(signature));
        Ok(token)
    }

    /// Verify signature, issuer, audience, and validity window.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<Claims<T>, TokenError> {
        self.verify_at(token, audience, unix_millis() / 1000)
    }

    fn verify_at<T: DeserializeOwned>(
        &self,
        token: &str,
        audience: &str,
        now: u64,
    ) -> Result<Claims<T>, TokenError> {
        let (signed, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (_, payload) = signed.split_once('.').ok_or(TokenError::Malformed)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(signed.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims<T> =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if claims.iss != self.issuer {
            return Err(TokenError::WrongIssuer);
        }
        if claims.aud != audience {
            return Err(TokenError::WrongAudience);
        }
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Mints the per-member credential a client uses to reconnect to the execution
/// node running its game.
pub struct HandOffIssuer {
    signer: TokenSigner,
    ttl: Duration,
}

impl HandOffIssuer {
    pub fn new(signer: TokenSigner, ttl: Duration) -> Self {
        Self { signer, ttl }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn issue(
        &self,
        game: &GameSession,
        node: &AssignedNode,
        member: &Member,
    ) -> Result<HandOffMsg, TokenError> {
        let claims = HandOffClaims {
            name: member.user.name.clone(),
            game_id: game.id.to_string(),
        };
        let credential = self.signer.sign(claims, HANDOFF_AUDIENCE, self.ttl)?;
        Ok(HandOffMsg {
            address: node.address.clone(),
            node_name: node.name.clone(),
            credential,
            game_id: game.id,
        })
    }
}
