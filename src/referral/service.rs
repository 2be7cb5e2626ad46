//! Referral capture and stealth-link generation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use super::codec::{self, DecodeError, EncodeError, ReferralPair};
use super::context::ReferralContext;
use super::notify::{SponsorNotice, SponsorNotifier};
use super::store::{self, SessionStore, StoreError};
use crate::config::ReferralConfig;

/// Outcome of inspecting an incoming request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub context: Option<ReferralContext>,
    /// The request URL without tracking parameters, when it carried any.
    pub clean_url: Option<String>,
}

pub struct ReferralService {
    config: ReferralConfig,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn SponsorNotifier>,
}

impl ReferralService {
    pub fn new(
        config: ReferralConfig,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn SponsorNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    pub fn encode(&self, referrer_id: &str, shop_slug: &str) -> Result<String, EncodeError> {
        codec::encode(referrer_id, shop_slug)
    }

    pub fn decode(&self, token: &str) -> Result<ReferralPair, DecodeError> {
        codec::decode(token)
    }

    /// `https://<domain>/<link_path>?<token_param>=<token>`
    pub fn generate_stealth_link(&self, referrer_id: &str, shop_slug: &str) -> Result<String, EncodeError> {
        let token = codec::encode(referrer_id, shop_slug)?;
        let domain = self.config.domain.trim_end_matches('/');
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        Ok(format!(
            "{base}/{}?{}={token}",
            self.config.link_path.trim_matches('/'),
            self.config.token_param
        ))
    }

    /// Attribute the visit at `location`.
    ///
    /// A combined token wins over the legacy loose parameters. Without any
    /// usable parameter the context stored earlier in this session is
    /// returned unchanged.
    pub fn capture(&self, location: &str) -> Capture {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot parse request URL '{location}': {e}");
                return Capture {
                    context: self.stored_referral(),
                    clean_url: None,
                };
            }
        };

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let tracking = self.tracking_params();
        let carried_tracking = params.keys().any(|k| tracking.contains(&k.as_str()));

        let token = raw_param(&url, &self.config.token_param);
        let pair = self.pair_from_params(token.as_deref(), &params);
        let context = pair.and_then(|(referrer, shop)| {
            match ReferralContext::resolve(&referrer, shop.as_deref(), &self.config) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    debug!("Ignoring referral parameters: {e}");
                    None
                }
            }
        });

        let context = match context {
            Some(ctx) => {
                if let Err(e) = store::save(self.store.as_ref(), &self.config.session_key, &ctx) {
                    warn!("Failed to persist referral context: {e}");
                }
                info!("Captured referral from {} ({})", ctx.referrer_id, ctx.referrer_name);
                Some(ctx)
            }
            None => self.stored_referral(),
        };

        Capture {
            context,
            clean_url: carried_tracking.then(|| strip_params(&url, &tracking)),
        }
    }

    pub fn stored_referral(&self) -> Option<ReferralContext> {
        store::load(self.store.as_ref(), &self.config.session_key)
    }

    /// Tell the stored referrer about a new lead. No-op without a referral.
    pub fn notify_sponsor(&self, lead_name: &str, focus: &str) {
        match self.stored_referral() {
            Some(ctx) => self
                .notifier
                .notify(SponsorNotice::new(lead_name, focus, &ctx.referrer_id)),
            None => debug!("No referral stored, sponsor notice for '{lead_name}' skipped"),
        }
    }

    /// Forget everything stored for this session (logout).
    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.store.clear()
    }

    fn tracking_params(&self) -> [&str; 3] {
        [
            self.config.token_param.as_str(),
            self.config.legacy_referrer_param.as_str(),
            self.config.legacy_shop_param.as_str(),
        ]
    }

    fn pair_from_params(
        &self,
        token: Option<&str>,
        params: &HashMap<String, String>,
    ) -> Option<(String, Option<String>)> {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            match codec::decode(token) {
                Ok(pair) => return Some((pair.referrer_id, Some(pair.shop_slug))),
                Err(e) => warn!("Ignoring malformed referral token: {e}"),
            }
        }

        let referrer = params
            .get(&self.config.legacy_referrer_param)
            .filter(|r| !r.trim().is_empty())?;
        let shop = params.get(&self.config.legacy_shop_param).cloned();
        Some((referrer.clone(), shop))
    }
}

/// Query value with a literal `+` kept; standard-alphabet tokens contain it.
fn raw_param(url: &Url, name: &str) -> Option<String> {
    let query = url.query()?.replace('+', "%2B");
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn strip_params(url: &Url, names: &[&str]) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key: &str = k;
            !names.contains(&key)
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(&kept);
    }
    clean.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::store::MemorySessionStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<SponsorNotice>>,
    }

    impl SponsorNotifier for RecordingNotifier {
        fn notify(&self, notice: SponsorNotice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    fn service() -> (ReferralService, Arc<MemorySessionStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = ReferralService::new(ReferralConfig::default(), store.clone(), notifier.clone());
        (service, store, notifier)
    }

    #[test]
    fn stealth_link_round_trips() {
        let (service, _, _) = service();
        let link = service
            .generate_stealth_link("067-2922111", "startupforworld")
            .unwrap();

        let prefix = "https://partners.example.com/jose?sync=";
        assert!(link.starts_with(prefix), "{link}");
        let pair = service.decode(&link[prefix.len()..]).unwrap();
        assert_eq!(pair.referrer_id, "067-2922111");
        assert_eq!(pair.shop_slug, "startupforworld");
    }

    #[test]
    fn capture_from_token_persists_and_strips() {
        let (service, _, _) = service();
        let token = service.encode("067-2922111", "startupforworld").unwrap();
        let capture = service.capture(&format!("https://partners.example.com/jose?sync={token}&lang=es"));

        let ctx = capture.context.unwrap();
        assert_eq!(ctx.referrer_id, "067-2922111");
        assert_eq!(ctx.referrer_name, "José");
        assert_eq!(ctx.shop_url, "https://shop.example.com/startupforworld");
        assert_eq!(
            capture.clean_url.as_deref(),
            Some("https://partners.example.com/jose?lang=es")
        );
        assert_eq!(service.stored_referral(), Some(ctx));
    }

    #[test]
    fn capture_accepts_standard_alphabet_token() {
        let (service, _, _) = service();
        // "~~~>>>|s" and "ab|~~~" in the standard alphabet, the second ending in '+'
        let capture = service.capture("https://partners.example.com/jose?sync=fn5+Pj4+fHM=");
        let ctx = capture.context.unwrap();
        assert_eq!(ctx.referrer_id, "~~~>>>");
        assert_eq!(ctx.shop_url, "https://shop.example.com/s");
        assert_eq!(capture.clean_url.as_deref(), Some("https://partners.example.com/jose"));

        let capture = service.capture("https://partners.example.com/jose?sync=YWJ8fn5+&lang=es");
        assert_eq!(capture.context.unwrap().referrer_id, "ab");
    }

    #[test]
    fn capture_from_legacy_params() {
        let (service, _, _) = service();
        let capture = service.capture("https://partners.example.com/?ref=A-77&shop=mi%20tienda");

        let ctx = capture.context.unwrap();
        assert_eq!(ctx.referrer_id, "A-77");
        assert_eq!(ctx.shop_url, "https://shop.example.com/mitienda");
        assert_eq!(capture.clean_url.as_deref(), Some("https://partners.example.com/"));
    }

    #[test]
    fn nothing_anywhere_yields_none() {
        let (service, _, _) = service();
        let capture = service.capture("https://partners.example.com/dashboard");
        assert_eq!(capture.context, None);
        assert_eq!(capture.clean_url, None);
    }

    #[test]
    fn later_visit_without_params_returns_stored_context() {
        let (service, _, _) = service();
        let first = service
            .capture("https://partners.example.com/?ref=R1")
            .context
            .unwrap();

        let second = service.capture("https://partners.example.com/academy");
        assert_eq!(second.context, Some(first));
    }

    #[test]
    fn malformed_token_falls_back_to_stored() {
        let (service, _, _) = service();
        let stored = service
            .capture("https://partners.example.com/?ref=R1")
            .context
            .unwrap();

        let capture = service.capture("https://partners.example.com/jose?sync=%%%garbage");
        assert_eq!(capture.context, Some(stored));
        assert_eq!(capture.clean_url.as_deref(), Some("https://partners.example.com/jose"));
    }

    #[test]
    fn unparsable_location_returns_stored() {
        let (service, _, _) = service();
        assert_eq!(service.capture("not a url").context, None);
    }

    #[test]
    fn sponsor_notified_only_with_referral() {
        let (service, _, notifier) = service();
        service.notify_sponsor("Ana", "energy");
        assert!(notifier.notices.lock().unwrap().is_empty());

        service.capture("https://partners.example.com/?ref=R9");
        service.notify_sponsor("Ana", "energy");

        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].referrer_id, "R9");
        assert_eq!(notices[0].lead_name, "Ana");
        assert_eq!(notices[0].focus, "energy");
    }

    #[test]
    fn logout_clears_referral() {
        let (service, store, _) = service();
        service.capture("https://partners.example.com/?ref=R1");
        store.set("other", "1".into()).unwrap();

        service.clear_session().unwrap();
        assert_eq!(service.stored_referral(), None);
        assert_eq!(store.get("other").unwrap(), None);
    }
}
