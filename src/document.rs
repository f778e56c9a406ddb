// Upstream document model
//
// XML payloads are folded into a `serde_json::Value` tree so that the mapper can
// navigate XML and JSON responses the same way. The root element is dropped,
// attributes and child elements become object keys, repeated children become
// arrays and text-only elements become strings.
use crate::error::FailureKind;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

/// Status reported when a 2xx response body cannot be read as a document.
pub const MALFORMED_PAYLOAD_STATUS: u16 = 502;

// Key used for the text of an element that also carries attributes
pub const TEXT_KEY: &str = "$value";

static NULL: Value = Value::Null;

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(name: String) -> Self {
        Self {
            name,
            fields: Map::new(),
            text: String::new(),
        }
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return (self.name, Value::String(text.to_string()));
        }
        let mut fields = self.fields;
        if !text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        (self.name, Value::Object(fields))
    }

    fn attach(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }
}

fn malformed(reason: impl Into<String>) -> FailureKind {
    FailureKind::rejected(MALFORMED_PAYLOAD_STATUS, reason)
}

/// Parse an upstream body. JSON bodies are read as is, everything else as XML.
pub fn parse(raw: &str) -> Result<Value, FailureKind> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| malformed(format!("invalid JSON: {e}")));
    }
    parse_xml(raw)
}

fn open_frame(e: &BytesStart<'_>) -> Result<Frame, FailureKind> {
    let mut frame = Frame::open(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|e| malformed(format!("invalid attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(format!("invalid attribute value: {e}")))?;
        frame.fields.insert(key, Value::String(value.into_owned()));
    }
    Ok(frame)
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn parse_xml(raw: &str) -> Result<Value, FailureKind> {
    let mut reader = Reader::from_str(raw);
    let mut stack = vec![Frame::open(String::new())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(open_frame(&e)?),
            Ok(Event::Empty(e)) => {
                let (name, value) = open_frame(&e)?.close();
                if let Some(parent) = stack.last_mut() {
                    parent.attach(name, value);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                let name = String::from_utf8_lossy(&e).into_owned();
                if let Some(top) = stack.last_mut() {
                    match resolve_entity(&name) {
                        Some(ch) => top.text.push(ch),
                        None => {
                            top.text.push('&');
                            top.text.push_str(&name);
                            top.text.push(';');
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(malformed("unbalanced closing tag"));
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.close();
                    if let Some(parent) = stack.last_mut() {
                        parent.attach(name, value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(malformed(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                )))
            }
            _ => (),
        }
    }

    if stack.len() != 1 {
        return Err(malformed("document ended inside an element"));
    }
    let document = stack.pop().map(|f| f.fields).unwrap_or_default();
    document
        .into_iter()
        .next()
        .map(|(_, root)| root)
        .ok_or_else(|| malformed("empty document"))
}

/// Checks the `<error>` status element every upstream response carries.
pub fn ensure_ok(doc: &Value) -> Result<(), FailureKind> {
    match text(at(doc, &["error"])) {
        Some(status) if !status.eq_ignore_ascii_case("OK") => Err(FailureKind::rejected(200, status)),
        _ => Ok(()),
    }
}

pub fn parse_ok(raw: &str) -> Result<Value, FailureKind> {
    let doc = parse(raw)?;
    ensure_ok(&doc)?;
    Ok(doc)
}

/// Treats a node as a list of 0, 1 or N entries regardless of its upstream shape.
pub fn as_list(node: &Value) -> Vec<&Value> {
    match node {
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::Array(items) => items.iter().filter(|v| !is_blank(v)).collect(),
        other => vec![other],
    }
}

fn is_blank(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Walks nested object keys; anything missing resolves to `Null`.
pub fn at<'a>(node: &'a Value, keys: &[&str]) -> &'a Value {
    keys.iter()
        .try_fold(node, |current, key| current.get(*key))
        .unwrap_or(&NULL)
}

pub fn text(node: &Value) -> Option<String> {
    let raw = match node {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(fields) => return fields.get(TEXT_KEY).and_then(text),
        _ => return None,
    };
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

pub fn text_at(node: &Value, keys: &[&str]) -> String {
    text(at(node, keys)).unwrap_or_default()
}

pub fn int_at(node: &Value, keys: &[&str]) -> Option<i64> {
    text(at(node, keys)).and_then(|raw| raw.parse().ok())
}

pub fn is_present(node: &Value) -> bool {
    !as_list(node).is_empty()
}
