//! Stealth-link token codec.
//!
//! A token is `base64url(normalize(referrer) + "|" + normalize(shop))` without
//! padding. It only compacts and obfuscates; it is not a signature.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const SEPARATOR: char = '|';

const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("referrer id is empty after normalization")]
    EmptyReferrer,

    #[error("{field} contains the reserved separator '|'")]
    SeparatorInField { field: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not valid base64: {0}")]
    MalformedToken(#[from] base64::DecodeError),

    #[error("token payload is not UTF-8")]
    NotUtf8,

    #[error("token payload has no separator")]
    MissingSeparator,

    #[error("token payload has more than one separator")]
    AmbiguousSeparator,

    #[error("token carries an empty referrer id")]
    EmptyReferrer,
}

/// The pair carried by a stealth link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPair {
    pub referrer_id: String,
    pub shop_slug: String,
}

/// Strip diacritics and all whitespace.
pub fn normalize(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c) && !c.is_whitespace())
        .nfc()
        .collect()
}

/// Encode a referrer/shop pair into a URL-safe token.
///
/// Fields containing the separator are rejected rather than producing a
/// token that would decode differently.
pub fn encode(referrer_id: &str, shop_slug: &str) -> Result<String, EncodeError> {
    let referrer = normalize(referrer_id);
    let shop = normalize(shop_slug);

    if referrer.is_empty() {
        return Err(EncodeError::EmptyReferrer);
    }
    if referrer.contains(SEPARATOR) {
        return Err(EncodeError::SeparatorInField { field: "referrer id" });
    }
    if shop.contains(SEPARATOR) {
        return Err(EncodeError::SeparatorInField { field: "shop slug" });
    }

    Ok(TOKEN_ENGINE.encode(format!("{referrer}{SEPARATOR}{shop}")))
}

/// Decode a token produced by [`encode`].
///
/// Tokens using the standard alphabet (`+`, `/`) or trailing `=` padding are
/// accepted too, since some messengers rewrite links. An inner space is read
/// as a `+` that went through form decoding.
pub fn decode(token: &str) -> Result<ReferralPair, DecodeError> {
    let remapped: String = token
        .trim()
        .chars()
        .map(|c| match c {
            '+' | ' ' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = TOKEN_ENGINE.decode(remapped)?;
    let payload = String::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;

    let (referrer, shop) = payload
        .split_once(SEPARATOR)
        .ok_or(DecodeError::MissingSeparator)?;
    if shop.contains(SEPARATOR) {
        return Err(DecodeError::AmbiguousSeparator);
    }
    if referrer.is_empty() {
        return Err(DecodeError::EmptyReferrer);
    }

    Ok(ReferralPair {
        referrer_id: referrer.to_string(),
        shop_slug: shop.to_string(),
    })
}
