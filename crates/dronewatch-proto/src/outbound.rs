use serde::Serialize;
use serde_json::Value;

/// Frames the client writes to the stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// Heartbeat; `t` is milliseconds on the sender's monotonic clock.
    Ping { t: f64 },
    /// Reply to a server ping, echoing its `t` exactly.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        t: Option<Value>,
    },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(frame: &Outbound) -> Value {
        serde_json::from_str(&frame.to_json().unwrap()).unwrap()
    }

    #[test]
    fn pong_echoes_t_verbatim() {
        let frame = Outbound::Pong { t: Some(json!(1234)) };
        assert_eq!(frame.to_json().unwrap(), r#"{"type":"pong","t":1234}"#);
    }

    #[test]
    fn pong_without_t_omits_it() {
        assert_eq!(wire(&Outbound::Pong { t: None }), json!({ "type": "pong" }));
    }

    #[test]
    fn ping_shape() {
        assert_eq!(wire(&Outbound::Ping { t: 3000.5 }), json!({ "type": "ping", "t": 3000.5 }));
    }
}
