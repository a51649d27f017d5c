//! Named throttle profiles: the built-in presets plus an optional bundle.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ThrottleError;
use crate::profile::{ThrottleProfile, NO_THROTTLING};

/// On-disk form, YAML or JSON:
///
/// ```yaml
/// default: fast-3g
/// profiles:
///   - { id: office-wifi, downloadBps: 1250000, uploadBps: 625000, latencyMs: 20 }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileBundle {
    #[serde(default)]
    pub profiles: Vec<ThrottleProfile>,
    #[serde(default)]
    pub default: Option<String>,
}

pub fn load_bundle_from_reader<R: Read>(mut reader: R) -> Result<ProfileBundle, ThrottleError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_bundle_str(&buf)
}

pub fn load_bundle_from_path(path: impl AsRef<Path>) -> Result<ProfileBundle, ThrottleError> {
    let file = File::open(path.as_ref())?;
    load_bundle_from_reader(file)
}

pub fn parse_bundle_str(raw: &str) -> Result<ProfileBundle, ThrottleError> {
    match serde_json::from_str(raw) {
        Ok(bundle) => Ok(bundle),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ThrottleError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}

#[derive(Clone, Debug)]
pub struct ProfileCatalog {
    profiles: Vec<ThrottleProfile>,
    default_id: String,
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileCatalog {
    pub fn builtin() -> Self {
        Self {
            profiles: ThrottleProfile::presets(),
            default_id: NO_THROTTLING.to_string(),
        }
    }

    /// Adds or replaces profiles by id. Nothing changes when any profile in
    /// the bundle is invalid or the default names an unknown id.
    pub fn merge_bundle(&mut self, bundle: ProfileBundle) -> Result<(), ThrottleError> {
        for profile in &bundle.profiles {
            profile.validate()?;
        }
        let mut merged = self.profiles.clone();
        for profile in bundle.profiles {
            match merged.iter_mut().find(|existing| existing.id == profile.id) {
                Some(existing) => *existing = profile,
                None => merged.push(profile),
            }
        }
        let default_id = match bundle.default {
            Some(id) if merged.iter().any(|p| p.id == id) => id,
            Some(id) => return Err(ThrottleError::UnknownProfile(id)),
            None => self.default_id.clone(),
        };
        self.profiles = merged;
        self.default_id = default_id;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&ThrottleProfile, ThrottleError> {
        self.profiles
            .iter()
            .find(|profile| profile.id == id)
            .ok_or_else(|| ThrottleError::UnknownProfile(id.to_string()))
    }

    pub fn list(&self) -> &[ThrottleProfile] {
        &self.profiles
    }

    pub fn default_profile(&self) -> &ThrottleProfile {
        self.profiles
            .iter()
            .find(|profile| profile.id == self.default_id)
            .unwrap_or(&self.profiles[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FAST_3G;

    #[test]
    fn yaml_bundle_extends_and_overrides() {
        let bundle = parse_bundle_str(
            r#"
default: office
profiles:
  - id: office
    downloadBps: 1250000
    uploadBps: 625000
    latencyMs: 20
  - id: fast-3g
    downloadBps: 180000
    uploadBps: 84375
    latencyMs: 600
"#,
        )
        .unwrap();
        let mut catalog = ProfileCatalog::builtin();
        catalog.merge_bundle(bundle).unwrap();

        assert_eq!(catalog.list().len(), 5);
        assert_eq!(catalog.get(FAST_3G).unwrap().latency_ms, 600);
        assert_eq!(catalog.default_profile().id, "office");
    }

    #[test]
    fn invalid_bundle_leaves_catalog_untouched() {
        let mut catalog = ProfileCatalog::builtin();
        let bundle = ProfileBundle {
            profiles: vec![ThrottleProfile::new("bad", -7, 0, 0)],
            default: None,
        };
        assert!(catalog.merge_bundle(bundle).is_err());
        assert_eq!(catalog.list().len(), 4);

        let unknown_default = ProfileBundle {
            profiles: Vec::new(),
            default: Some("nope".into()),
        };
        assert!(matches!(
            catalog.merge_bundle(unknown_default),
            Err(ThrottleError::UnknownProfile(_))
        ));
        assert_eq!(catalog.default_profile().id, NO_THROTTLING);
    }

    #[test]
    fn json_bundles_parse_too() {
        let bundle = parse_bundle_str(r#"{"profiles":[{"id":"x","downloadBps":-1,"uploadBps":-1,"latencyMs":5}]}"#)
            .unwrap();
        assert_eq!(bundle.profiles[0].latency_ms, 5);
        assert!(parse_bundle_str("profiles: [").is_err());
    }
}
