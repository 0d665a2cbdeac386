//! Server-Sent Events wire encoding.
//!
//! Every frame is a block of `field: value` lines terminated by a blank line.
//! Browsers dispatch a named event (`addEventListener(name, ...)`) for each
//! block carrying an `event:` line.

/// Comment frame sent on every heartbeat tick. EventSource ignores it, but the
/// write itself exposes dead connections.
pub const HEARTBEAT: &str = ": ping\n\n";

/// Reconnect hint sent once, before any event, on every new subscription.
pub fn retry(retry_ms: u64) -> String {
    format!("retry: {retry_ms}\n\n")
}

/// Encode one named event.
///
/// Multi-line payloads are split over several `data:` lines; the browser
/// re-joins them with `\n`.
pub fn event(id: u64, name: &str, data: &str) -> String {
    let mut out = String::with_capacity(name.len() + data.len() + 32);
    out.push_str("id: ");
    out.push_str(&id.to_string());
    out.push_str("\nevent: ");
    out.push_str(name);
    out.push('\n');
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        out.push('\n');
    }
    out.push('\n');
    out
}

/// A decoded event block, as an EventSource would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub id: Option<u64>,
    pub name: String,
    pub data: String,
}

/// Decode every complete named event in `buf`.
///
/// Returns the events and the number of bytes consumed; a trailing partial
/// block is left for the next call. Comment and `retry:` blocks are consumed
/// but produce no event.
pub fn parse(buf: &str) -> (Vec<ParsedEvent>, usize) {
    let mut events = Vec::new();
    let mut consumed = 0;

    while let Some(end) = buf[consumed..].find("\n\n") {
        let block = &buf[consumed..consumed + end];
        consumed += end + 2;

        let mut id = None;
        let mut name = None;
        let mut data: Vec<&str> = Vec::new();
        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (key, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match key {
                "id" => id = value.parse().ok(),
                "event" => name = Some(value.to_string()),
                "data" => data.push(value),
                _ => {}
            }
        }
        if let Some(name) = name {
            events.push(ParsedEvent {
                id,
                name,
                data: data.join("\n"),
            });
        }
    }

    (events, consumed)
}
