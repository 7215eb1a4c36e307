//! JSON Schema validation for cleaning profiles.
//!
//! The profile schema (JSON Schema Draft 7) is embedded at compile time from
//! `schemas/cleaning-profile.json`. It checks document shape only: known stage
//! ids, field types, no stray keys. Parameter ranges and stage ordering are
//! checked by [`CleaningProfile::validate`](crate::transform::CleaningProfile::validate).
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use flightclean::validation::validate_profile;
//!
//! let doc = json!({ "stages": [{ "stage_id": "size_filter", "enabled": true }] });
//! assert!(validate_profile(&doc).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

const PROFILE_SCHEMA_SOURCE: &str = include_str!("../../schemas/cleaning-profile.json");

static PROFILE_SCHEMA: Lazy<Result<Value, String>> = Lazy::new(|| {
    serde_json::from_str(PROFILE_SCHEMA_SOURCE).map_err(|e| format!("Invalid embedded schema: {}", e))
});

/// Validate a JSON document against a JSON schema.
///
/// Returns every violation, not just the first.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// The embedded profile schema.
pub fn profile_schema() -> ConfigResult<&'static Value> {
    PROFILE_SCHEMA.as_ref().map_err(|e| ConfigError::Schema {
        errors: vec![e.clone()],
    })
}

/// Validate a profile document against the profile schema.
pub fn validate_profile(data: &Value) -> ConfigResult<()> {
    validate(profile_schema()?, data).map_err(|errors| ConfigError::Schema { errors })
}

/// Quick check against the profile schema.
pub fn is_valid_profile(data: &Value) -> bool {
    validate_profile(data).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_schema_parses() {
        assert!(profile_schema().is_ok());
    }

    #[test]
    fn test_minimal_profile_valid() {
        let doc = json!({ "stages": [{ "stage_id": "size_filter" }] });
        assert!(is_valid_profile(&doc));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let doc = json!({ "stages": [{ "stage_id": "teleporter", "enabled": true }] });
        let err = validate_profile(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { ref errors } if !errors.is_empty()));
    }

    #[test]
    fn test_wrong_types_rejected() {
        assert!(!is_valid_profile(&json!({ "stages": "all" })));
        assert!(!is_valid_profile(&json!({ "stages": [{ "stage_id": "resequencer", "enabled": "yes" }] })));
        assert!(!is_valid_profile(&json!({ "name": "x" })));
    }

    #[test]
    fn test_generic_validate_collects_errors() {
        let schema = json!({
            "type": "object",
            "required": ["a", "b"]
        });
        let errors = validate(&schema, &json!({})).unwrap_err();
        assert!(!errors.is_empty());
    }
}
