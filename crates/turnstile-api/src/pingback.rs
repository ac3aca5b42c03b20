//! Pingback messages posted to the entitlements service
//!
//! Messages are serialized as positional arrays, optionally led by a label,
//! which is the shape the service accepts in the `f.req` form field.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AnalyticsEvent;

/// Entitlement result reported with a pingback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementResult {
    UnknownEntitlementResult,
    UnlockedSubscriber,
    UnlockedFree,
    UnlockedMeter,
    LockedRegwall,
    LockedPaywall,
    IneligiblePaywall,
}

impl EntitlementResult {
    pub fn code(&self) -> u32 {
        match self {
            EntitlementResult::UnknownEntitlementResult => 0,
            EntitlementResult::UnlockedSubscriber => 1001,
            EntitlementResult::UnlockedFree => 1002,
            EntitlementResult::UnlockedMeter => 1003,
            EntitlementResult::LockedRegwall => 2001,
            EntitlementResult::LockedPaywall => 2002,
            EntitlementResult::IneligiblePaywall => 2003,
        }
    }

    /// Result implied by a client event, if the event reports one
    pub fn from_event(event: AnalyticsEvent) -> Option<Self> {
        match event {
            AnalyticsEvent::ImpressionRegwall => Some(EntitlementResult::LockedRegwall),
            AnalyticsEvent::EventUnlockedByMeter => Some(EntitlementResult::UnlockedMeter),
            AnalyticsEvent::EventUnlockedBySubscription => {
                Some(EntitlementResult::UnlockedSubscriber)
            }
            AnalyticsEvent::EventUnlockedFreePage => Some(EntitlementResult::UnlockedFree),
            AnalyticsEvent::ImpressionPaywall => Some(EntitlementResult::LockedPaywall),
            AnalyticsEvent::EventIneligiblePaywall => Some(EntitlementResult::IneligiblePaywall),
            _ => None,
        }
    }
}

/// Which service granted the access being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementSource {
    UnknownEntitlementSource,
    GoogleSubscriberEntitlement,
    GoogleShowcaseMeteringService,
    SubscribeWithGoogleMeteringService,
    PublisherEntitlement,
}

impl EntitlementSource {
    pub fn code(&self) -> u32 {
        match self {
            EntitlementSource::UnknownEntitlementSource => 0,
            EntitlementSource::GoogleSubscriberEntitlement => 1001,
            EntitlementSource::GoogleShowcaseMeteringService => 2001,
            EntitlementSource::SubscribeWithGoogleMeteringService => 2002,
            EntitlementSource::PublisherEntitlement => 3001,
        }
    }
}

/// Metering client types found in a metering token's claims
pub mod meter_client_type {
    pub const LICENSED_BY_GOOGLE: u32 = 1;
    pub const METERED_BY_GOOGLE: u32 = 2;
}

/// Protobuf style timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timestamp {
    #[serde(alias = "seconds_")]
    pub seconds: i64,
    #[serde(alias = "nanos_")]
    pub nanos: i64,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i64) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self {
            seconds: ms.div_euclid(1000),
            nanos: ms.rem_euclid(1000) * 1_000_000,
        }
    }

    pub fn to_array(&self, include_label: bool) -> Value {
        if include_label {
            json!(["Timestamp", self.seconds, self.nanos])
        } else {
            json!([self.seconds, self.nanos])
        }
    }
}

/// The grant a pingback refers to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementJwt {
    pub jwt: Option<String>,
    pub source: Option<String>,
}

impl EntitlementJwt {
    pub fn new(jwt: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            jwt: Some(jwt.into()),
            source: Some(source.into()),
        }
    }

    pub fn to_array(&self, include_label: bool) -> Value {
        if include_label {
            json!(["EntitlementJwt", self.jwt, self.source])
        } else {
            json!([self.jwt, self.source])
        }
    }
}

/// Body of a `/publication/{id}/entitlements` pingback
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementsRequest {
    pub used_entitlement: Option<EntitlementJwt>,
    pub client_event_time: Option<Timestamp>,
    pub entitlement_source: EntitlementSource,
    pub entitlement_result: EntitlementResult,
    pub token: Option<String>,
    pub is_user_registered: Option<bool>,
    pub subscription_timestamp: Option<Timestamp>,
}

impl EntitlementsRequest {
    pub fn new(source: EntitlementSource, result: EntitlementResult) -> Self {
        Self {
            used_entitlement: None,
            client_event_time: None,
            entitlement_source: source,
            entitlement_result: result,
            token: None,
            is_user_registered: None,
            subscription_timestamp: None,
        }
    }

    pub fn to_array(&self, include_label: bool) -> Value {
        let nested = |v: Option<Value>| v.unwrap_or_else(|| json!([]));
        let mut fields = vec![
            nested(self.used_entitlement.as_ref().map(|e| e.to_array(include_label))),
            nested(self.client_event_time.as_ref().map(|t| t.to_array(include_label))),
            json!(self.entitlement_source.code()),
            json!(self.entitlement_result.code()),
            json!(self.token),
            json!(self.is_user_registered),
            nested(
                self.subscription_timestamp
                    .as_ref()
                    .map(|t| t.to_array(include_label)),
            ),
        ];
        if include_label {
            fields.insert(0, json!("EntitlementsRequest"));
        }
        Value::Array(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_from_millis() {
        let ts = Timestamp::from_millis(1_600_000_000_123);
        assert_eq!(ts.seconds, 1_600_000_000);
        assert_eq!(ts.nanos, 123_000_000);
        assert_eq!(ts.to_array(false), json!([1_600_000_000i64, 123_000_000i64]));
    }

    #[test]
    fn request_array_layout() {
        let mut request = EntitlementsRequest::new(
            EntitlementSource::GoogleShowcaseMeteringService,
            EntitlementResult::UnlockedMeter,
        );
        request.used_entitlement = Some(EntitlementJwt::new("jwt", "google:metering"));
        request.client_event_time = Some(Timestamp::new(10, 0));
        request.token = Some("gaa_n".into());

        assert_eq!(
            request.to_array(false),
            json!([
                ["jwt", "google:metering"],
                [10, 0],
                2001,
                1003,
                "gaa_n",
                null,
                []
            ])
        );

        let labeled = request.to_array(true);
        assert_eq!(labeled[0], json!("EntitlementsRequest"));
        assert_eq!(labeled[1], json!(["EntitlementJwt", "jwt", "google:metering"]));
    }

    #[test]
    fn event_to_result_mapping() {
        assert_eq!(
            EntitlementResult::from_event(AnalyticsEvent::ImpressionRegwall),
            Some(EntitlementResult::LockedRegwall)
        );
        assert_eq!(
            EntitlementResult::from_event(AnalyticsEvent::ActionGetEntitlements),
            None
        );
    }
}
