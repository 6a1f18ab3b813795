//! Relay wire frames.
//!
//! Client to relay:
//! ```text
//! ["EVENT", <event>]
//! ["REQ", <subscription id>, <filter>]
//! ```
//! Relay to client:
//! ```text
//! ["EVENT", <subscription id>, <event>]
//! ["EOSE", <subscription id>]
//! ["NOTICE", <message>]
//! ["OK", <event id>, <accepted>, <message>]
//! ["CLOSED", <subscription id>, <message>]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::{InboundEvent, SyncEvent};
use crate::{Result, WireError};

/// Subscription filter: events of `kinds`, by `authors`, tagged with one of `d_tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Vec<u16>,
    pub authors: Vec<String>,
    #[serde(rename = "#d")]
    pub d_tags: Vec<String>,
}

impl Filter {
    pub fn new(kind: u16, author: &str, d_tag: &str) -> Self {
        Self {
            kinds: vec![kind],
            authors: vec![author.to_string()],
            d_tags: vec![d_tag.to_string()],
        }
    }

    /// Whether `event` is one this filter asked for. Fields the relay left
    /// out are not held against it.
    pub fn matches(&self, event: &InboundEvent) -> bool {
        let kind_ok = event.kind.map_or(true, |k| self.kinds.contains(&k));
        let author_ok = event
            .pubkey
            .as_deref()
            .map_or(true, |p| self.authors.iter().any(|a| a == p));
        let tag_ok = event
            .d_tag()
            .map_or(true, |t| self.d_tags.iter().any(|d| d == t));
        kind_ok && author_ok && tag_ok
    }
}

/// Frames sent to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Event(SyncEvent),
    Req {
        subscription_id: String,
        filter: Filter,
    },
    /// Stop a subscription opened with `Req`.
    Close {
        subscription_id: String,
    },
}

impl ClientFrame {
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientFrame::Event(_) => "EVENT",
            ClientFrame::Req { .. } => "REQ",
            ClientFrame::Close { .. } => "CLOSE",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientFrame::Event(event) => json!(["EVENT", event]),
            ClientFrame::Req {
                subscription_id,
                filter,
            } => json!(["REQ", subscription_id, filter]),
            ClientFrame::Close { subscription_id } => json!(["CLOSE", subscription_id]),
        };
        serde_json::to_string(&value).map_err(|e| WireError::Json(e.to_string()))
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Event {
        subscription_id: String,
        event: InboundEvent,
    },
    Eose {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayFrame {
    /// Parse a relay text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let items: Vec<Value> =
            serde_json::from_str(text).map_err(|e| WireError::Json(e.to_string()))?;
        let label = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::Shape("frame must start with a label".into()))?;

        match label {
            "EVENT" => {
                expect_len(&items, 3, label)?;
                let event = serde_json::from_value(items[2].clone())
                    .map_err(|e| WireError::Shape(format!("bad event object: {e}")))?;
                Ok(RelayFrame::Event {
                    subscription_id: string_at(&items, 1, label)?,
                    event,
                })
            }
            "EOSE" => {
                expect_len(&items, 2, label)?;
                Ok(RelayFrame::Eose {
                    subscription_id: string_at(&items, 1, label)?,
                })
            }
            "NOTICE" => {
                expect_len(&items, 2, label)?;
                Ok(RelayFrame::Notice {
                    message: string_at(&items, 1, label)?,
                })
            }
            "OK" => {
                expect_len(&items, 4, label)?;
                let accepted = items[2]
                    .as_bool()
                    .ok_or_else(|| WireError::Shape("OK flag must be a boolean".into()))?;
                Ok(RelayFrame::Ok {
                    event_id: string_at(&items, 1, label)?,
                    accepted,
                    message: string_at(&items, 3, label)?,
                })
            }
            "CLOSED" => {
                expect_len(&items, 3, label)?;
                Ok(RelayFrame::Closed {
                    subscription_id: string_at(&items, 1, label)?,
                    message: string_at(&items, 2, label)?,
                })
            }
            other => Err(WireError::UnknownFrame(other.to_string())),
        }
    }
}

fn expect_len(items: &[Value], len: usize, label: &str) -> Result<()> {
    if items.len() == len {
        Ok(())
    } else {
        Err(WireError::Shape(format!(
            "{label} frame has {} elements, expected {len}",
            items.len()
        )))
    }
}

fn string_at(items: &[Value], index: usize, label: &str) -> Result<String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WireError::Shape(format!("{label} element {index} must be a string")))
}
