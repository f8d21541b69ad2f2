//! Case-insensitive SIP header collection.
//!
//! Headers are kept as an ordered list of name/value pairs so repeated
//! headers (multiple `Via` on a proxied request) survive a round trip.
//! Lookup accepts the RFC 3261 compact forms.

use std::fmt;

/// Expand a compact header name to its canonical long form.
fn expand(name: &str) -> &str {
    match name {
        "v" | "V" => "Via",
        "f" | "F" => "From",
        "t" | "T" => "To",
        "i" | "I" => "Call-ID",
        "m" | "M" => "Contact",
        "c" | "C" => "Content-Type",
        "l" | "L" => "Content-Length",
        "k" | "K" => "Supported",
        other => other,
    }
}

/// Ordered, case-insensitive SIP header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Append a header, preserving insertion order.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name` (case-insensitive, compact-form aware).
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = expand(name);
        self.entries
            .iter()
            .find(|(n, _)| expand(n).eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let wanted = expand(name);
        self.entries
            .iter()
            .filter(move |(n, _)| expand(n).eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let wanted = expand(name);
        self.entries
            .retain(|(n, _)| !expand(n).eq_ignore_ascii_case(wanted));
        self.entries.push((wanted.to_string(), value.into()));
    }

    /// Remove all values of `name`.
    pub fn remove(&mut self, name: &str) {
        let wanted = expand(name);
        self.entries
            .retain(|(n, _)| !expand(n).eq_ignore_ascii_case(wanted));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Extract the bare URI from an address header value.
    ///
    /// `"Alice" <sip:alice@example.com>;tag=abc` → `sip:alice@example.com`.
    /// Values without angle brackets are returned up to the first `;`.
    pub fn address(value: &str) -> &str {
        if let Some(start) = value.find('<') {
            if let Some(end) = value[start..].find('>') {
                return &value[start + 1..start + end];
            }
        }
        value.split(';').next().unwrap_or(value).trim()
    }

    /// Extract a `tag=` parameter from an address header value.
    pub fn tag(value: &str) -> Option<&str> {
        // The tag parameter lives outside the angle brackets.
        let after = match value.find('>') {
            Some(pos) => &value[pos + 1..],
            None => value,
        };
        after.split(';').find_map(|p| {
            let p = p.trim();
            p.strip_prefix("tag=")
        })
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_compact_aware() {
        let mut h = Headers::new();
        h.push("i", "abc@host");
        h.push("VIA", "SIP/2.0/UDP a.example.com;branch=z9hG4bK1");
        h.push("Via", "SIP/2.0/UDP b.example.com;branch=z9hG4bK2");

        assert_eq!(h.get("Call-ID"), Some("abc@host"));
        assert_eq!(h.get_all("via").count(), 2);
    }

    #[test]
    fn set_replaces_all_occurrences() {
        let mut h = Headers::new();
        h.push("Contact", "<sip:a@1.2.3.4>");
        h.push("Contact", "<sip:b@1.2.3.4>");
        h.set("Contact", "<sip:c@1.2.3.4>");
        assert_eq!(h.get_all("Contact").count(), 1);
        assert_eq!(h.get("Contact"), Some("<sip:c@1.2.3.4>"));
    }

    #[test]
    fn address_and_tag_extraction() {
        let v = "\"Alice\" <sip:alice@example.com>;tag=314159";
        assert_eq!(Headers::address(v), "sip:alice@example.com");
        assert_eq!(Headers::tag(v), Some("314159"));

        let bare = "sip:bob@example.net;tag=99";
        assert_eq!(Headers::address(bare), "sip:bob@example.net");
    }
}
