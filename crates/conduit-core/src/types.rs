use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier newtype.
///
/// New identifiers are UUIDv7 so rows sort by creation time and log lines
/// correlate easily.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// The acting user or account behind a job, import or event.
    UserId
);
string_id!(
    /// A workspace; owns jobs and a sandbox schema imports land in.
    WorkspaceId
);
string_id!(DataSourceId);
string_id!(DatasetId);
string_id!(JobId);
string_id!(TaskId);
string_id!(ImportId);
string_id!(
    /// A recurring import definition that may own many imports.
    ImportScheduleId
);
string_id!(EventId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ImportId::from("imp-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""imp-1""#);
        assert_eq!(id.to_string(), "imp-1");
    }
}
