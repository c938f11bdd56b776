//! Typed records for the JSON listing format.
//!
//! Decoding is fail-closed: a record that matches neither schema is a
//! decode error, never a permissively-evaluated value.

use serde::Deserialize;

/// One container in an account listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    /// Object count.
    pub count: u64,
    /// Bytes used.
    pub bytes: u64,
}

/// One object in a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectRecord {
    pub name: String,
    pub bytes: u64,
    /// MD5 of the object's content, lowercase hex.
    pub hash: String,
    pub last_modified: String,
    pub content_type: String,
}

/// An entry in a container listing: a real object, or a rolled-up
/// pseudo-directory when the listing was issued with a delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectEntry {
    Object(ObjectRecord),
    Subdir { subdir: String },
}

impl ObjectEntry {
    /// The field that advances the pagination marker: the object name,
    /// or the subdir prefix for rolled-up entries.
    pub fn marker(&self) -> &str {
        match self {
            ObjectEntry::Object(record) => &record.name,
            ObjectEntry::Subdir { subdir } => subdir,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRecord> {
        match self {
            ObjectEntry::Object(record) => Some(record),
            ObjectEntry::Subdir { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_account_listing() {
        let body = r#"[
            {"name": "photos", "count": 2, "bytes": 2048},
            {"name": "backups", "count": 0, "bytes": 0}
        ]"#;
        let listing: Vec<ContainerRecord> = serde_json::from_str(body).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "photos");
        assert_eq!(listing[0].bytes, 2048);
    }

    #[test]
    fn decodes_object_and_subdir_entries() {
        let body = r#"[
            {"name": "cats/a.jpg", "bytes": 17, "hash": "abc",
             "last_modified": "2011-03-04T12:00:00.000000",
             "content_type": "image/jpeg"},
            {"subdir": "dogs/"}
        ]"#;
        let listing: Vec<ObjectEntry> = serde_json::from_str(body).unwrap();
        assert_eq!(listing[0].marker(), "cats/a.jpg");
        assert!(listing[0].as_object().is_some());
        assert_eq!(listing[1].marker(), "dogs/");
        assert!(listing[1].as_object().is_none());
    }

    #[test]
    fn unknown_shapes_fail_closed() {
        let body = r#"[{"unexpected": true}]"#;
        assert!(serde_json::from_str::<Vec<ObjectEntry>>(body).is_err());
        assert!(serde_json::from_str::<Vec<ContainerRecord>>(body).is_err());
    }

    #[test]
    fn missing_required_fields_fail_closed() {
        // An object record without its hash is a schema violation, not
        // a subdir.
        let body = r#"[{"name": "x", "bytes": 1}]"#;
        assert!(serde_json::from_str::<Vec<ObjectEntry>>(body).is_err());
    }
}
