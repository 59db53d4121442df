use serde::{Deserialize, Serialize};

/// Flight command body for `POST /command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlightCommand {
    Takeoff,
    Land,
    Hold,
    ReturnHome,
    SetAltitude(f64),
}
