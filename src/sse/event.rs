//! Typed event records.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FlowgateError, Result};

/// One decoded event record.
///
/// `data` is the structured payload; a record is only ever emitted when a
/// `data` field was present. The remaining fields are the optional
/// event-stream metadata lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    /// Event name, from the `event` field.
    pub event: Option<String>,
    /// Structured payload, parsed from the `data` field.
    pub data: T,
    /// Record id, from the `id` field.
    pub id: Option<String>,
    /// Reconnection delay hint in milliseconds, from the `retry` field.
    pub retry: Option<u64>,
}

impl<T> Event<T> {
    /// A record carrying only a payload.
    pub fn new(data: T) -> Self {
        Self {
            event: None,
            data,
            id: None,
            retry: None,
        }
    }

    /// Set the event name.
    pub fn with_event(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    /// Set the record id.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Set the retry hint.
    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl<T: Serialize> Event<T> {
    /// Serialize the record into wire framing, including the trailing
    /// blank-line delimiter. The payload is written as a single JSON
    /// `data` line.
    pub fn to_wire(&self) -> Result<String> {
        let mut out = String::new();

        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }

        out.push_str("data: ");
        out.push_str(&serde_json::to_string(&self.data)?);
        out.push_str("\n\n");

        Ok(out)
    }
}

impl<T: DeserializeOwned> Event<T> {
    /// Parse one complete record (without its trailing delimiter).
    ///
    /// Returns `Ok(None)` when the record carried no `data` field; such
    /// records are silently dropped. Lines without a colon and
    /// unrecognized field names are ignored. A `retry` value that does
    /// not parse as an integer is ignored as well; a `data` payload that
    /// does not parse fails the whole record.
    pub(crate) fn parse(record: &str) -> Result<Option<Self>> {
        let mut event = None;
        let mut data = None;
        let mut id = None;
        let mut retry = None;

        for line in record.split('\n') {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match field {
                "event" => event = Some(value.to_string()),
                "data" => {
                    let parsed = serde_json::from_str(value).map_err(|e| {
                        FlowgateError::Decode(format!("malformed data payload: {e}"))
                    })?;
                    data = Some(parsed);
                }
                "id" => id = Some(value.to_string()),
                "retry" => retry = value.parse().ok().or(retry),
                _ => {}
            }
        }

        Ok(data.map(|data| Event {
            event,
            data,
            id,
            retry,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_parse_full_record() {
        let record = "event: update\nid: 7\nretry: 3000\ndata: {\"n\": 1}";
        let event: Event<Value> = Event::parse(record).unwrap().unwrap();

        assert_eq!(event.event.as_deref(), Some("update"));
        assert_eq!(event.id.as_deref(), Some("7"));
        assert_eq!(event.retry, Some(3000));
        assert_eq!(event.data, serde_json::json!({"n": 1}));
    }

    #[test]
    fn test_record_without_data_is_dropped() {
        let parsed: Option<Event<Value>> = Event::parse("id: 5").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_unrecognized_fields_and_bare_lines_ignored() {
        let record = "comment line\nx-custom: nope\ndata: 42";
        let event: Event<Value> = Event::parse(record).unwrap().unwrap();
        assert_eq!(event.data, serde_json::json!(42));
        assert!(event.event.is_none());
    }

    #[test]
    fn test_malformed_retry_is_ignored() {
        let record = "retry: soon\ndata: true";
        let event: Event<Value> = Event::parse(record).unwrap().unwrap();
        assert_eq!(event.retry, None);
        assert_eq!(event.data, serde_json::json!(true));
    }

    #[test]
    fn test_malformed_data_fails_record() {
        let result: Result<Option<Event<Value>>> = Event::parse("data: not-json");
        assert!(result.is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let event = Event::new(serde_json::json!({"k": "v"}))
            .with_event("tick")
            .with_id("3")
            .with_retry(500);

        let wire = event.to_wire().unwrap();
        assert!(wire.ends_with("\n\n"));

        let parsed: Event<Value> = Event::parse(wire.trim_end()).unwrap().unwrap();
        assert_eq!(parsed, event);
    }
}
