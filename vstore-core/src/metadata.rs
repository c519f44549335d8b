//! Item attributes and basic properties

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File attributes reported by every backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attributes {
    pub read_only: bool,
    pub directory: bool,
}

impl Attributes {
    pub const NORMAL: Attributes = Attributes { read_only: false, directory: false };
    pub const READ_ONLY: Attributes = Attributes { read_only: true, directory: false };
    pub const DIRECTORY: Attributes = Attributes { read_only: false, directory: true };

    pub fn is_normal(&self) -> bool {
        !self.read_only && !self.directory
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Size and timestamps of an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicProperties {
    pub size: u64,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
}

impl BasicProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_created(mut self, created: Option<DateTime<Utc>>) -> Self {
        self.date_created = created;
        self
    }

    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.date_modified = modified;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_constants() {
        assert!(Attributes::NORMAL.is_normal());
        assert!(!Attributes::READ_ONLY.is_normal());
        assert!(Attributes::DIRECTORY.directory);
        assert_eq!(Attributes::NORMAL.with_read_only(true), Attributes::READ_ONLY);
    }

    #[test]
    fn test_properties_builder() {
        let now = Utc::now();
        let props = BasicProperties::new().with_size(42).with_modified(Some(now));
        assert_eq!(props.size, 42);
        assert_eq!(props.date_modified, Some(now));
        assert!(props.date_created.is_none());
    }
}
