//! Route handlers.

pub mod branch;
pub mod chat;
pub mod conversation;

use serde::{Deserialize, Deserializer};

/// Ids arrive as JSON numbers or numeric strings (the UI sends both).
#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Number(i64),
    Text(String),
}

pub(crate) fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match IdValue::deserialize(deserializer)? {
        IdValue::Number(n) => Ok(n),
        IdValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid id: {s}"))),
    }
}

pub(crate) fn de_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    let value = Option::<IdValue>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(IdValue::Number(n)) => Ok(Some(n)),
        Some(IdValue::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id: {s}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "super::de_id")]
        id: i64,
        #[serde(default, deserialize_with = "super::de_opt_id")]
        parent: Option<i64>,
    }

    /// **Scenario**: ids decode from numbers and numeric strings; garbage
    /// is a decode error.
    #[test]
    fn id_decoding() {
        let p: Probe = serde_json::from_str(r#"{"id": "100", "parent": 7}"#).unwrap();
        assert_eq!(p.id, 100);
        assert_eq!(p.parent, Some(7));
        let p: Probe = serde_json::from_str(r#"{"id": 100}"#).unwrap();
        assert_eq!(p.parent, None);
        assert!(serde_json::from_str::<Probe>(r#"{"id": "abc"}"#).is_err());
    }
}
