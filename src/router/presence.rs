//! §4.10 PresenceEngine: domain/capability/geo filters applied over a
//! snapshot of the live registry. There is no dedicated "engine" struct —
//! the filters are plain predicates run once per `PRESENCE` frame, since the
//! registry itself is the only state involved and it already lives on
//! `RouterCore` (spec §9 favors a shared-state shape over introducing a
//! second owner of the same data).

use serde_json::Value;
use uuid::Uuid;

use crate::model::Connection;
use crate::protocol::inbound::{NearPayload, PresenceFrame};
use crate::protocol::outbound::{ErrorReason, OutboundFrame, PresenceAddress};

use super::RouterCore;

/// Mean Earth radius in kilometres, the usual constant for a haversine
/// great-circle estimate.
const EARTH_RADIUS_KM: f64 = 6371.0;

impl RouterCore {
    pub(crate) fn handle_presence(&mut self, session_id: Uuid, frame: PresenceFrame) {
        if self.registry.get(session_id).and_then(|c| c.address.as_ref()).is_none() {
            self.send_to(session_id, OutboundFrame::error(ErrorReason::NotRegistered, "PRESENCE", None));
            return;
        }

        let query = frame.query.unwrap_or_default();
        let domain_filter = query.domain.map(|d| d.to_lowercase());
        let capability_filter = query.capabilities.unwrap_or_default();

        if let Some(near) = &query.near {
            if near.radius_km < 0.0 {
                self.send_to(
                    session_id,
                    OutboundFrame::error(ErrorReason::InvalidPayload, "PRESENCE", Some("near.radius_km must be >= 0".into())),
                );
                return;
            }
        }

        let addresses: Vec<PresenceAddress> = self
            .registry
            .iter()
            .filter(|conn| conn.session_id != session_id)
            .filter_map(|conn| {
                matches_query(conn, domain_filter.as_deref(), &capability_filter, query.near.as_ref())
                    .then(|| PresenceAddress {
                        address: conn.address.as_ref().unwrap().to_string(),
                        status: conn.status,
                        metadata: conn.metadata.clone(),
                    })
            })
            .collect();

        self.send_to(session_id, OutboundFrame::PresenceResult { addresses });
    }
}

fn matches_query(conn: &Connection, domain: Option<&str>, capabilities: &[String], near: Option<&NearPayload>) -> bool {
    let Some(address) = &conn.address else { return false };

    if let Some(domain) = domain {
        if !address.domain().eq_ignore_ascii_case(domain) {
            return false;
        }
    }

    if !capabilities.is_empty() {
        let held = conn
            .metadata
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();
        if !capabilities.iter().all(|required| held.contains(&required.as_str())) {
            return false;
        }
    }

    if let Some(near) = near {
        let Some(location) = conn.metadata.get("location") else { return false };
        let (Some(lat), Some(lon)) = (
            location.get("lat").and_then(Value::as_f64),
            location.get("lon").and_then(Value::as_f64),
        ) else {
            return false;
        };
        if haversine_km(near.lat, near.lon, lat, lon) > near.radius_km {
            return false;
        }
    }

    true
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().clamp(-1.0, 1.0).asin();
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km(40.0, -73.0, 40.0, -73.0) < 1e-9);
    }

    #[test]
    fn haversine_roughly_matches_known_distance() {
        // New York to London, ~5570km great-circle.
        let km = haversine_km(40.7128, -74.0060, 51.5074, -0.1278);
        assert!((km - 5570.0).abs() < 50.0, "got {km}");
    }
}
