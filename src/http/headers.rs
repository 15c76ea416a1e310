//! Header fields carried by HTTP/2 messages
//!
//! HTTP/2 requires field names in lower case, so names are folded when they
//! are stored. Lookups fold too, which lets callers keep writing
//! `Content-Type` if they prefer.

use std::fmt;

/// Per-field overhead used by HTTP/2 header list size accounting
/// (RFC 7541 Section 4.1)
pub const HEADER_FIELD_OVERHEAD: usize = 32;

/// Ordered list of header fields, repeated names allowed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; an existing field with the same name is kept
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.fields.push((name, value.into()));
    }

    /// First value stored under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value stored under `name`, in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drop every field named `name`, returning how many went
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Size of this list as counted by SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn list_size(&self) -> usize {
        self.iter().map(|(n, v)| field_size(n, v)).sum()
    }
}

/// Accounted size of a single field
pub fn field_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + HEADER_FIELD_OVERHEAD
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl Extend<(String, String)> for Headers {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_folded_on_insert() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/grpc");

        assert_eq!(headers.iter().next(), Some(("content-type", "application/grpc")));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/grpc"));
        assert!(headers.contains("content-type"));
        assert!(!headers.contains("content-length"));
    }

    #[test]
    fn test_repeated_fields() {
        let mut headers = Headers::new();
        headers.insert("set-cookie", "session=abc");
        headers.insert("vary", "accept-encoding");
        headers.insert("set-cookie", "theme=dark");

        assert_eq!(headers.get("set-cookie"), Some("session=abc"));
        assert_eq!(headers.get_all("set-cookie"), vec!["session=abc", "theme=dark"]);
        assert_eq!(headers.remove("Set-Cookie"), 2);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.remove("set-cookie"), 0);
    }

    #[test]
    fn test_lookup_key_may_be_temporary() {
        let mut headers = Headers::new();
        headers.insert("etag", "\"v2\"");

        let value = {
            let key = String::from("ETag");
            headers.get(&key)
        };
        let all = headers.get_all(&"etag".to_string());
        assert_eq!(value, Some("\"v2\""));
        assert_eq!(all, vec!["\"v2\""]);
    }

    #[test]
    fn test_list_size() {
        let mut headers = Headers::new();
        assert_eq!(headers.list_size(), 0);

        headers.insert("grpc-status", "0");
        assert_eq!(headers.list_size(), 11 + 1 + 32);

        headers.insert("etag", "\"v1\"");
        assert_eq!(headers.list_size(), 44 + field_size("etag", "\"v1\""));
    }

    #[test]
    fn test_collect_decoded_fields() {
        let decoded = vec![
            ("server".to_string(), "h2wire-test".to_string()),
            ("date".to_string(), "Mon, 19 Oct 2026 00:00:00 GMT".to_string()),
        ];
        let headers: Headers = decoded.into_iter().collect();

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["server", "date"]);
        assert_eq!(headers.to_string(), "server: h2wire-test\ndate: Mon, 19 Oct 2026 00:00:00 GMT\n");
    }
}
