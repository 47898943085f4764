//! Card: the unit of fetch.

use serde::{Deserialize, Serialize};

/// An analytics query identified by an opaque UUID, plus its display title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    uuid: String,
    title: String,
}

impl Card {
    pub fn new(uuid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            title: title.into(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Key of this card's rows in a fetch result.
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl std::fmt::Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title, self.uuid)
    }
}
