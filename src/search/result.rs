use serde::{Deserialize, Serialize};

use crate::core::item::Item;

/// Which search path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    FullText,
    Vector,
    Hybrid,
    Category,
    Exact,
}

impl MatchType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FullText => "Full-text",
            Self::Vector => "Semantic",
            Self::Hybrid => "Hybrid",
            Self::Category => "Category",
            Self::Exact => "Exact",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Ranked search hit handed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub item: Item,
    /// Relevance in `[0, 1]`, higher is better. Only comparable within one result list.
    pub score: f32,
    pub match_type: MatchType,
    /// Name with matched terms wrapped in `<b>`/`</b>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_snippet: Option<String>,
}

impl SearchResult {
    pub fn new(item: Item, score: f32, match_type: MatchType) -> Self {
        Self {
            item,
            score,
            match_type,
            name_snippet: None,
            description_snippet: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.item.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_for_ui() {
        let item = Item {
            id: 7,
            name: "Bolt".to_string(),
            sku: "B-1".to_string(),
            description: None,
            category: None,
        };
        let mut result = SearchResult::new(item, 0.5, MatchType::FullText);
        result.name_snippet = Some("<b>Bolt</b>".to_string());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["match_type"], "fullText");
        assert_eq!(json["name_snippet"], "<b>Bolt</b>");
        assert!(json.get("description_snippet").is_none());
        assert_eq!(json["item"]["id"], 7);
    }

    #[test]
    fn test_match_type_labels() {
        assert_eq!(MatchType::Vector.to_string(), "Semantic");
        assert_eq!(MatchType::Exact.label(), "Exact");
    }
}
