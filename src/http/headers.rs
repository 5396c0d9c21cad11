//! Ordered HTTP header collection.
//!
//! Names compare case-insensitively, duplicates keep their order, and the
//! original spelling of each name is preserved on the wire.

use std::fmt;

pub const CONNECTION: &str = "connection";
pub const PROXY_CONNECTION: &str = "proxy-connection";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_ENCODING: &str = "content-encoding";
pub const TRANSFER_ENCODING: &str = "transfer-encoding";

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Headers in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.entries.iter()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// Every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.is(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.is(name))
    }

    /// Append a header, keeping any existing ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// Replace the first `name` header in place and drop the rest, or append
    /// when absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|h| h.is(name)) {
            Some(first) => {
                self.entries[first].value = value;
                let mut index = 0;
                self.entries.retain(|h| {
                    let keep = index <= first || !h.is(name);
                    index += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    /// Remove every `name` header, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.is(name));
        before - self.entries.len()
    }

    /// Fold `proxy-connection` into `connection` before the response goes
    /// back to the client.
    ///
    /// A `proxy-connection` value wins over any `connection` value. Repeated
    /// `connection` headers collapse into one comma-joined header. No
    /// `proxy-connection` header survives.
    pub fn fix_proxy_headers(&mut self) {
        if let Some(proxy) = self.get(PROXY_CONNECTION).map(str::to_owned) {
            self.set(CONNECTION, proxy);
        } else if self.get_all(CONNECTION).count() > 1 {
            let joined = self.get_all(CONNECTION).collect::<Vec<_>>().join(", ");
            self.set(CONNECTION, joined);
        }
        self.remove(PROXY_CONNECTION);
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderList
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, v)| Header::new(n, v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(headers: &HeaderList) -> Vec<&str> {
        headers.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn lookup_ignores_case() {
        let headers: HeaderList = [("Content-Type", "text/plain")].into_iter().collect();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn duplicates_keep_order() {
        let headers: HeaderList = [("Set-Cookie", "a=1"), ("Vary", "x"), ("set-cookie", "b=2")]
            .into_iter()
            .collect();
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), ["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_first_and_drops_rest() {
        let mut headers: HeaderList = [("A", "1"), ("B", "2"), ("a", "3")].into_iter().collect();
        headers.set("a", "9");
        assert_eq!(names(&headers), ["A", "B"]);
        assert_eq!(headers.get("a"), Some("9"));
    }

    #[test]
    fn proxy_connection_becomes_connection() {
        let mut headers: HeaderList = [("Server", "x"), ("Proxy-Connection", "close")]
            .into_iter()
            .collect();
        headers.fix_proxy_headers();

        assert_eq!(headers.get_all(CONNECTION).collect::<Vec<_>>(), ["close"]);
        assert!(!headers.contains(PROXY_CONNECTION));
    }

    #[test]
    fn proxy_connection_overrides_connection() {
        let mut headers: HeaderList = [
            ("Connection", "keep-alive"),
            ("Date", "today"),
            ("proxy-connection", "close"),
        ]
        .into_iter()
        .collect();
        headers.fix_proxy_headers();

        assert_eq!(names(&headers), ["Connection", "Date"]);
        assert_eq!(headers.get(CONNECTION), Some("close"));
    }

    #[test]
    fn many_of_each_leave_exactly_one_connection() {
        let mut headers: HeaderList = [
            ("connection", "keep-alive"),
            ("PROXY-CONNECTION", "close"),
            ("Connection", "upgrade"),
            ("proxy-connection", "keep-alive"),
        ]
        .into_iter()
        .collect();
        headers.fix_proxy_headers();

        assert_eq!(headers.get_all(CONNECTION).collect::<Vec<_>>(), ["close"]);
        assert_eq!(headers.get_all(PROXY_CONNECTION).count(), 0);
    }

    #[test]
    fn repeated_connection_headers_collapse() {
        let mut headers: HeaderList = [("Connection", "keep-alive"), ("connection", "upgrade")]
            .into_iter()
            .collect();
        headers.fix_proxy_headers();
        assert_eq!(
            headers.get_all(CONNECTION).collect::<Vec<_>>(),
            ["keep-alive, upgrade"]
        );
    }

    #[test]
    fn no_connection_headers_is_untouched() {
        let mut headers: HeaderList = [("Server", "x")].into_iter().collect();
        headers.fix_proxy_headers();
        assert_eq!(names(&headers), ["Server"]);
    }

    #[test]
    fn display_is_wire_form() {
        assert_eq!(Header::new("X-Id", "7").to_string(), "X-Id: 7");
    }
}
