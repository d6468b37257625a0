use crate::CoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Build provenance embedded in the image as its own layer.
///
/// Fields serialize in declaration order, so equal values always produce
/// the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlData {
    pub created: String,
    pub name: String,
    pub version: String,
}

impl ControlData {
    pub fn new(name: impl Into<String>, version: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            created: created.to_rfc3339_opts(SecondsFormat::Micros, false),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ControlData {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        ControlData::new("rock-name", "1.0", created)
    }

    #[test]
    fn created_is_rfc3339_utc() {
        assert_eq!(sample().created, "2024-03-01T12:30:00.000000+00:00");
    }

    #[test]
    fn yaml_has_fixed_key_order() {
        let yaml = sample().to_yaml().unwrap();
        let keys: Vec<&str> = yaml
            .lines()
            .map(|l| l.split(':').next().unwrap())
            .collect();
        assert_eq!(keys, vec!["created", "name", "version"]);
        assert!(yaml.contains("name: rock-name\n"));
    }

    #[test]
    fn yaml_roundtrip() {
        let data = sample();
        let parsed: ControlData = serde_yaml::from_str(&data.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn yaml_is_reproducible() {
        assert_eq!(sample().to_yaml().unwrap(), sample().to_yaml().unwrap());
    }
}
