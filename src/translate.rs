use std::collections::HashMap;

/// Resolves name and description keys to display text
pub trait Translate: Send + Sync {
    fn from_key(&self, key: &str) -> String;
}

/// Uses the key itself as the display text
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyTranslate;

impl Translate for KeyTranslate {
    fn from_key(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Table lookup, falling back to the key when no entry exists
#[derive(Debug, Default, Clone)]
pub struct MapTranslate {
    entries: HashMap<String, String>,
}

impl MapTranslate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }
}

impl Translate for MapTranslate {
    fn from_key(&self, key: &str) -> String {
        self.entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_translate_falls_back_to_key() {
        let translate = MapTranslate::new().with_entry("db", "Database");
        assert_eq!(translate.from_key("db"), "Database");
        assert_eq!(translate.from_key("mail"), "mail");
    }
}
