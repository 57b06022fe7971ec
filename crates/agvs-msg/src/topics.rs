//! ---
//! agvs_section: "02-fleet-protocol"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Channel names used on the fleet broker."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---

/// Fleet-wide request channel; map snapshot requests arrive here.
pub const API_REQUEST: &str = "services/api/request";

/// Shared reply channel for correlated command responses.
pub const API_RESPONSE: &str = "services/api/response";

/// Retained coordinator availability channel (`online`/`offline`).
pub const API_STATUS: &str = "services/api/status";

/// Fleet-wide alert channel.
pub const ALERTS: &str = "system/alerts";

/// Route planner inbox; plan-route commands are published here.
pub const ROUTE_PLANNER_REQUEST: &str = "services/route-planner/request";

/// Inbound state channel for one vehicle.
pub fn vehicle_state(vehicle_id: i64) -> String {
    format!("vehicles/{vehicle_id}/state")
}

/// Outbound command channel for one vehicle.
pub fn vehicle_command(vehicle_id: i64) -> String {
    format!("vehicles/{vehicle_id}/request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_channels_embed_the_id() {
        assert_eq!(vehicle_state(7), "vehicles/7/state");
        assert_eq!(vehicle_command(7), "vehicles/7/request");
    }

    #[test]
    fn fleet_channels_are_distinct() {
        let all = [
            API_REQUEST,
            API_RESPONSE,
            API_STATUS,
            ALERTS,
            ROUTE_PLANNER_REQUEST,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
