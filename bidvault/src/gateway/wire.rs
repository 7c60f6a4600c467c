//! Wire format of the auction endpoint.
//!
//! One POST body carries the publisher/device identity, the consent flag and
//! one slot per requested ad unit; the response carries a `slots` array plus
//! an optional config object. Slots are matched back to ad units by the
//! impression id minted into the request. Response slots are deserialized
//! individually so one malformed slot never poisons the rest.

use crate::adunit::AdUnitKey;
use crate::bid::{Bid, BidPayload};
use crate::gateway::types::RequestContext;
use crate::ident::IdGenerator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Request body of one auction call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequestBody {
    /// Correlation id of the whole request.
    pub id: String,
    pub publisher: PublisherBody,
    pub user: UserBody,
    pub gdpr: GdprBody,
    pub slots: Vec<SlotRequestBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherBody {
    pub bundle_id: String,
    pub publisher_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBody {
    pub device_id: String,
    pub device_os: String,
    pub sdk_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprBody {
    pub consent_given: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequestBody {
    pub impression_id: String,
    pub placement_id: String,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
}

/// Response body of one auction call.
///
/// Slots stay raw JSON here; [`SlotResponseBody`] parsing happens per slot.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponseBody {
    #[serde(default)]
    pub slots: Vec<serde_json::Value>,
    #[serde(default)]
    pub config: Option<ConfigBody>,
    #[serde(default)]
    pub time_to_next_call: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBody {
    pub kill_switch: bool,
}

/// One priced (or silenced) slot in the response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResponseBody {
    pub impression_id: String,
    pub placement_id: String,
    #[serde(deserialize_with = "cpm_as_string")]
    pub cpm: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub display_url: Option<String>,
    #[serde(default)]
    pub native: Option<serde_json::Value>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// The endpoint is allowed to send the CPM as either a JSON string or a
/// number; normalize to the decimal string the rest of the engine uses.
fn cpm_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CpmField {
        Text(String),
        Number(f64),
    }

    Ok(match CpmField::deserialize(deserializer)? {
        CpmField::Text(s) => s,
        CpmField::Number(n) => n.to_string(),
    })
}

/// Build the request body for `keys`, minting one impression id per slot.
///
/// Returns the body together with the impression-id → ad-unit map used to
/// attribute response slots.
pub fn build_request(
    keys: &[AdUnitKey],
    ctx: &RequestContext,
    ids: &IdGenerator,
) -> (BidRequestBody, HashMap<String, AdUnitKey>) {
    let mut slots = Vec::with_capacity(keys.len());
    let mut key_by_impression = HashMap::with_capacity(keys.len());

    for key in keys {
        let impression_id = ids.generate();
        slots.push(SlotRequestBody {
            impression_id: impression_id.clone(),
            placement_id: key.placement_id.clone(),
            width: key.width,
            height: key.height,
            format: key.format.as_str(),
        });
        key_by_impression.insert(impression_id, key.clone());
    }

    let body = BidRequestBody {
        id: ctx.correlation_id.clone(),
        publisher: PublisherBody {
            bundle_id: ctx.publisher.bundle_id.clone(),
            publisher_id: ctx.publisher.publisher_id.clone(),
        },
        user: UserBody {
            device_id: ctx.device.device_id.clone(),
            device_os: ctx.device.os.clone(),
            sdk_version: ctx.device.sdk_version.clone(),
        },
        gdpr: GdprBody {
            consent_given: ctx.consent_given,
        },
        slots,
    };

    (body, key_by_impression)
}

/// Convert a parsed response slot into a [`Bid`].
///
/// A zero CPM becomes a silence entry with the literal server TTL; a priced
/// slot with `ttl = 0` gets `default_ttl_secs`. Returns the reason string
/// when the slot is malformed (unparseable CPM, priced slot without a
/// payload) so the caller can log and skip it.
pub fn bid_from_slot(
    slot: SlotResponseBody,
    received_at: DateTime<Utc>,
    default_ttl_secs: u64,
) -> Result<Bid, &'static str> {
    let Ok(cpm_value) = slot.cpm.trim().parse::<f64>() else {
        return Err("unparseable cpm");
    };
    let silence = cpm_value <= 0.0;

    let payload = if silence {
        None
    } else {
        match (slot.display_url, slot.native) {
            (Some(url), _) => Some(BidPayload::Display(url)),
            (None, Some(native)) => Some(BidPayload::Native(native)),
            (None, None) => return Err("priced slot without payload"),
        }
    };

    let ttl_seconds = if !silence && slot.ttl == 0 {
        default_ttl_secs
    } else {
        slot.ttl
    };

    Ok(Bid {
        cpm: slot.cpm,
        currency: slot.currency,
        payload,
        width_px: slot.width,
        height_px: slot.height,
        ttl_seconds,
        received_at,
        impression_id: slot.impression_id,
    })
}
