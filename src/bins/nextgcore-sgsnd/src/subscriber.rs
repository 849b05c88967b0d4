//! GPRS Subscriber Data
//!
//! Subscriber profiles as delivered by the HLR (Insert Subscriber Data) and
//! the store interface the core reads them through.

use std::collections::HashMap;
use std::sync::Arc;

/// One subscribed PDP context (APN entry)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberPdpData {
    pub context_id: u32,
    /// APN in dotted form, `*` allows any APN
    pub apn_str: String,
    /// Encoded subscribed QoS
    pub qos_subscribed: Vec<u8>,
    /// PDP context charging characteristics
    pub pdp_charg: Option<[u8; 2]>,
}

/// GPRS subscriber profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberProfile {
    pub imsi: String,
    pub msisdn: String,
    /// Subscribed PDP contexts, in HLR order
    pub pdp_list: Vec<SubscriberPdpData>,
    /// Subscriber wide charging characteristics
    pub pdp_charg: Option<[u8; 2]>,
}

impl SubscriberProfile {
    pub fn new(imsi: &str) -> Self {
        Self {
            imsi: imsi.to_string(),
            ..Default::default()
        }
    }

    /// Append a subscribed APN
    pub fn with_apn(mut self, apn_str: &str, qos: &[u8], pdp_charg: Option<[u8; 2]>) -> Self {
        let context_id = self.pdp_list.len() as u32 + 1;
        self.pdp_list.push(SubscriberPdpData {
            context_id,
            apn_str: apn_str.to_string(),
            qos_subscribed: qos.to_vec(),
            pdp_charg,
        });
        self
    }
}

/// Subscriber profile store
pub trait SubscriberStore {
    /// Current profile of `imsi`, if any
    fn get_profile(&mut self, imsi: &str) -> Option<Arc<SubscriberProfile>>;

    /// Give back a profile reference obtained from `get_profile`
    fn release_profile(&mut self, profile: Arc<SubscriberProfile>);

    /// Insert Subscriber Data: create or replace the profile of its IMSI.
    /// References already handed out keep the previous version.
    fn update_profile(&mut self, profile: SubscriberProfile);
}

/// In-memory subscriber store
#[derive(Debug, Default)]
pub struct LocalSubscriberStore {
    profiles: HashMap<String, Arc<SubscriberProfile>>,
}

impl LocalSubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a profile
    pub fn remove(&mut self, imsi: &str) -> bool {
        self.profiles.remove(imsi).is_some()
    }

    /// References handed out for `imsi` and still held elsewhere
    pub fn outstanding_refs(&self, imsi: &str) -> usize {
        self.profiles
            .get(imsi)
            .map_or(0, |p| Arc::strong_count(p).saturating_sub(1))
    }
}

impl SubscriberStore for LocalSubscriberStore {
    fn get_profile(&mut self, imsi: &str) -> Option<Arc<SubscriberProfile>> {
        self.profiles.get(imsi).cloned()
    }

    fn release_profile(&mut self, profile: Arc<SubscriberProfile>) {
        log::debug!("Releasing subscriber profile IMSI[{}]", profile.imsi);
    }

    fn update_profile(&mut self, profile: SubscriberProfile) {
        log::debug!("Subscriber profile IMSI[{}] updated", profile.imsi);
        self.profiles.insert(profile.imsi.clone(), Arc::new(profile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_builder() {
        let profile = SubscriberProfile::new("001010000000001")
            .with_apn("internet", &[0x01], None)
            .with_apn("*", &[], Some([0x08, 0x00]));
        assert_eq!(profile.pdp_list.len(), 2);
        assert_eq!(profile.pdp_list[0].context_id, 1);
        assert_eq!(profile.pdp_list[1].apn_str, "*");
        assert_eq!(profile.pdp_list[1].pdp_charg, Some([0x08, 0x00]));
    }

    #[test]
    fn test_local_store_refs() {
        let mut store = LocalSubscriberStore::new();
        store.update_profile(SubscriberProfile::new("001010000000001"));
        assert!(store.get_profile("001010000000002").is_none());

        let profile = store.get_profile("001010000000001").unwrap();
        assert_eq!(store.outstanding_refs("001010000000001"), 1);
        store.release_profile(profile);
        assert_eq!(store.outstanding_refs("001010000000001"), 0);
        assert!(store.remove("001010000000001"));
    }

    #[test]
    fn test_update_keeps_old_reference() {
        let mut store = LocalSubscriberStore::new();
        store.update_profile(SubscriberProfile::new("001010000000001"));
        let old = store.get_profile("001010000000001").unwrap();

        let mut newer = SubscriberProfile::new("001010000000001");
        newer.msisdn = "4900".into();
        store.update_profile(newer);

        assert!(old.msisdn.is_empty());
        assert_eq!(store.get_profile("001010000000001").unwrap().msisdn, "4900");
    }
}
