use crate::services::engine::PredictionResult;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

/// Body of `POST /predict`.
///
/// Both fields are optional at the serde layer so that a missing field is
/// reported through validation as a client error rather than as a generic
/// deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PredictionRequest {
    #[validate(
        required(message = "bucket is required"),
        length(min = 1, message = "bucket must not be empty")
    )]
    pub bucket: Option<String>,

    #[validate(
        required(message = "blob is required"),
        length(min = 1, message = "blob must not be empty")
    )]
    pub blob: Option<String>,
}

/// A validated storage address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub blob: String,
}

impl PredictionRequest {
    pub fn into_location(self) -> Result<ObjectLocation, ValidationErrors> {
        self.validate()?;

        // Names are passed to storage as given; blank ones never are.
        let mut errors = ValidationErrors::new();
        for (field, value) in [("bucket", &self.bucket), ("blob", &self.blob)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                let mut error = ValidationError::new("blank");
                error.message = Some(format!("{} must not be empty", field).into());
                errors.add(field, error);
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ObjectLocation {
            bucket: self.bucket.unwrap_or_default(),
            blob: self.blob.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub predictions: PredictionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> PredictionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn complete_request_yields_location() {
        let location = request(r#"{"bucket":"boltz","blob":"ligand.fasta"}"#)
            .into_location()
            .unwrap();
        assert_eq!(
            location,
            ObjectLocation {
                bucket: "boltz".into(),
                blob: "ligand.fasta".into()
            }
        );
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        let errors = request(r#"{"bucket":"boltz"}"#).into_location().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("blob"));
        assert!(!fields.contains_key("bucket"));

        let errors = request("{}").into_location().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);
    }

    #[test]
    fn empty_strings_are_rejected() {
        let errors = request(r#"{"bucket":"","blob":"x"}"#)
            .into_location()
            .unwrap_err();
        assert!(errors.to_string().contains("bucket must not be empty"));
    }

    #[test]
    fn whitespace_only_fields_are_rejected() {
        let errors = request(r#"{"bucket":"   ","blob":"\t"}"#)
            .into_location()
            .unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("bucket"));
        assert!(fields.contains_key("blob"));
        assert!(errors.to_string().contains("blob must not be empty"));
    }

    #[test]
    fn surrounding_whitespace_is_kept() {
        let location = request(r#"{"bucket":"boltz","blob":" a.fasta"}"#)
            .into_location()
            .unwrap();
        assert_eq!(location.blob, " a.fasta");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let location = request(r#"{"bucket":"b","blob":"k","instances":[1]}"#)
            .into_location()
            .unwrap();
        assert_eq!(location.blob, "k");
    }
}
