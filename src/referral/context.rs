//! The attribution record for one browsing session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codec::normalize;
use crate::config::ReferralConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("referrer id is empty")]
    EmptyReferrer,
}

/// Who referred this visit and which storefront it belongs to.
///
/// Built once per session and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralContext {
    pub referrer_id: String,
    pub referrer_name: String,
    pub shop_url: String,
    pub language: String,
}

impl ReferralContext {
    /// Resolve display name and shop URL for a referrer.
    pub fn resolve(
        referrer_id: &str,
        shop_slug: Option<&str>,
        config: &ReferralConfig,
    ) -> Result<Self, ContextError> {
        let referrer_id = referrer_id.trim();
        if referrer_id.is_empty() {
            return Err(ContextError::EmptyReferrer);
        }

        let referrer_name = config
            .founders
            .get(referrer_id)
            .cloned()
            .unwrap_or_else(|| config.fallback_name.clone());

        let shop_url = shop_slug
            .map(normalize)
            .filter(|slug| !slug.is_empty())
            .map_or_else(
                || config.default_shop_url.clone(),
                |slug| config.shop_url_template.replace("{slug}", &slug),
            );

        Ok(Self {
            referrer_id: referrer_id.to_string(),
            referrer_name,
            shop_url,
            language: config.default_language.clone(),
        })
    }
}
