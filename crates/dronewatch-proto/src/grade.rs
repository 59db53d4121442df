//! Display grades derived from telemetry and link health.

use std::fmt;

pub const LATENCY_GOOD_MS: f64 = 40.0;
pub const LATENCY_WARN_MS: f64 = 100.0;

pub const RISK_LOW: f64 = 25.0;
pub const RISK_MEDIUM: f64 = 60.0;
pub const RISK_HIGH: f64 = 85.0;

pub const BATTERY_CRITICAL_PCT: u8 = 10;
pub const BATTERY_LOW_PCT: u8 = 25;
pub const BATTERY_CAUTION_PCT: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyGrade {
    Unknown,
    Good,
    Warn,
    Bad,
}

impl LatencyGrade {
    pub fn from_latency(latency_ms: Option<f64>) -> Self {
        match latency_ms {
            Some(ms) if ms.is_finite() => {
                if ms < LATENCY_GOOD_MS {
                    Self::Good
                } else if ms < LATENCY_WARN_MS {
                    Self::Warn
                } else {
                    Self::Bad
                }
            }
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for LatencyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "measuring",
            Self::Good => "good",
            Self::Warn => "warn",
            Self::Bad => "bad",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskBand {
    Safe,
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn from_risk(risk_level: f64) -> Self {
        if risk_level >= RISK_HIGH {
            Self::High
        } else if risk_level >= RISK_MEDIUM {
            Self::Medium
        } else if risk_level >= RISK_LOW {
            Self::Low
        } else {
            Self::Safe
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "SAFE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Offline,
    Critical,
    Low,
    Caution,
    Nominal,
}

impl BatteryStatus {
    pub fn from_percent(pct: u8) -> Self {
        match pct {
            0 => Self::Offline,
            p if p < BATTERY_CRITICAL_PCT => Self::Critical,
            p if p < BATTERY_LOW_PCT => Self::Low,
            p if p < BATTERY_CAUTION_PCT => Self::Caution,
            _ => Self::Nominal,
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offline => "drone offline",
            Self::Critical => "CRITICAL battery",
            Self::Low => "low battery",
            Self::Caution => "battery getting low",
            Self::Nominal => "nominal",
        })
    }
}
