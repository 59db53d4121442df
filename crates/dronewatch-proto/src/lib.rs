pub mod grade;
pub mod inbound;
mod lenient;
pub mod outbound;
pub mod telemetry;

pub use inbound::{DecodeError, Inbound, TelemetryEnvelope};
pub use outbound::Outbound;
pub use telemetry::{Event, EventType, SystemIntegrity, TelemetryFrame};
