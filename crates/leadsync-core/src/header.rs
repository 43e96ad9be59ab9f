use std::collections::HashMap;

/// Normalize a header cell the way every lookup sees it: trimmed and lowercased.
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Column lookup by header text for one snapshot of a sheet.
///
/// Blank headers are skipped. When two headers normalize to the same key the
/// rightmost column wins, matching how a sheet-wide map is built left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    index: HashMap<String, usize>,
    ordered: Vec<String>,
}

impl HeaderMap {
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut index = HashMap::new();
        let mut ordered = Vec::with_capacity(headers.len());
        for (col, header) in headers.iter().enumerate() {
            let key = normalize_header(header.as_ref());
            ordered.push(key.clone());
            if !key.is_empty() {
                index.insert(key, col);
            }
        }
        Self { index, ordered }
    }

    /// Exact lookup after normalizing `name`; no fuzzy matching at this layer.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(&normalize_header(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Normalized keys in column order, blanks included so positions line up.
    pub fn keys_in_order(&self) -> &[String] {
        &self.ordered
    }

    /// Non-blank normalized keys, in column order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ordered
            .iter()
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.ordered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_trimmed_and_case_folded() {
        let map = HeaderMap::from_headers(&["  Name ", "websiteUrl", "", "airtableAction"]);
        assert_eq!(map.get("name"), Some(0));
        assert_eq!(map.get("NAME"), Some(0));
        assert_eq!(map.get("websiteurl"), Some(1));
        assert_eq!(map.get("airtableaction"), Some(3));
        assert_eq!(map.len(), 3);
        assert_eq!(map.width(), 4);
    }

    #[test]
    fn blank_headers_are_not_addressable() {
        let map = HeaderMap::from_headers(&["", "   "]);
        assert!(map.is_empty());
        assert_eq!(map.get(""), None);
        assert_eq!(map.keys().count(), 0);
    }

    #[test]
    fn no_fuzzy_matching() {
        let map = HeaderMap::from_headers(&["airtable action"]);
        assert_eq!(map.get("airtableaction"), None);
        assert_eq!(map.get("airtable action"), Some(0));
    }
}
