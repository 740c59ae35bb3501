//! Permission model - a (resource, action) pair.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WILDCARD: &str = "*";

/// Permission entity, uniquely identified by `(resource, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Exact match, or `*` in either position.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == WILDCARD || self.resource == resource)
            && (self.action == WILDCARD || self.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        let exact = Permission::new("workout:create", "workout", "create");
        assert!(exact.matches("workout", "create"));
        assert!(!exact.matches("workout", "delete"));

        let any_action = Permission::new("workout:*", "workout", WILDCARD);
        assert!(any_action.matches("workout", "delete"));
        assert!(!any_action.matches("program", "delete"));

        let all = Permission::new("*", WILDCARD, WILDCARD);
        assert!(all.matches("anything", "at_all"));
    }
}
