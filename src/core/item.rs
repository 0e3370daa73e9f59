use serde::{Deserialize, Serialize};

/// A catalog record as seen by the search core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

/// Fields for a record that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl NewItem {
    pub fn new(name: impl Into<String>, sku: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sku: sku.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl Item {
    /// Text blob used for embedding.
    ///
    /// Fields are repeated to weight them: name x3, SKU x2, category x2, description x1.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(8);

        parts.extend([self.name.as_str(); 3]);
        parts.extend([self.sku.as_str(); 2]);

        if let Some(category) = &self.category {
            parts.extend([category.as_str(); 2]);
        }

        if let Some(description) = &self.description {
            parts.push(description);
        }

        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_weights() {
        let item = Item {
            id: 1,
            name: "Bolt".to_string(),
            sku: "B-1".to_string(),
            description: Some("steel".to_string()),
            category: Some("Fasteners".to_string()),
        };

        assert_eq!(
            item.searchable_text(),
            "Bolt Bolt Bolt B-1 B-1 Fasteners Fasteners steel"
        );
    }

    #[test]
    fn test_searchable_text_optional_fields() {
        let item = Item {
            id: 2,
            name: "Nut".to_string(),
            sku: "N-1".to_string(),
            description: None,
            category: None,
        };

        assert_eq!(item.searchable_text(), "Nut Nut Nut N-1 N-1");
    }
}
