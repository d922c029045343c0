//! Per-request preservation options and their merge semantics.

use serde::{Deserialize, Serialize};

use crate::aps::{processing_config, ProcessingConfig};

/// Options a request may set for one preservation run. Partial configs are
/// merged with the defaults field by field: booleans OR with the default,
/// other fields override only when non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreservationConfig {
    /// Wrap the extracted AIP in a ZIP archive.
    pub compress_aip: bool,
    /// Processing flags forwarded to the archival processing service.
    #[serde(rename = "a3m_config")]
    pub a3m: ProcessingConfig,
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            compress_aip: false,
            a3m: default_processing_config(),
        }
    }
}

/// Default processing flags submitted with a transfer.
pub fn default_processing_config() -> ProcessingConfig {
    ProcessingConfig {
        assign_uuids_to_directories: true,
        examine_contents: false,
        generate_transfer_structure_report: true,
        document_empty_directories: true,
        extract_packages: true,
        delete_packages_after_extraction: false,
        identify_transfer: true,
        identify_submission_and_metadata: true,
        identify_before_normalization: true,
        normalize: true,
        transcribe_files: true,
        perform_policy_checks_on_originals: true,
        perform_policy_checks_on_preservation_derivatives: true,
        perform_policy_checks_on_access_derivatives: true,
        thumbnail_mode: processing_config::ThumbnailMode::Generate as i32,
        aip_compression_level: 1,
        aip_compression_algorithm: processing_config::AipCompressionAlgorithm::S7Copy as i32,
    }
}

impl PreservationConfig {
    /// Merges this (possibly partial) config with the defaults.
    pub fn merge_with_defaults(&self) -> PreservationConfig {
        let defaults = PreservationConfig::default();
        let input = &self.a3m;
        let base = defaults.a3m;

        PreservationConfig {
            compress_aip: self.compress_aip || defaults.compress_aip,
            a3m: ProcessingConfig {
                assign_uuids_to_directories: input.assign_uuids_to_directories
                    || base.assign_uuids_to_directories,
                examine_contents: input.examine_contents || base.examine_contents,
                generate_transfer_structure_report: input.generate_transfer_structure_report
                    || base.generate_transfer_structure_report,
                document_empty_directories: input.document_empty_directories
                    || base.document_empty_directories,
                extract_packages: input.extract_packages || base.extract_packages,
                delete_packages_after_extraction: input.delete_packages_after_extraction
                    || base.delete_packages_after_extraction,
                identify_transfer: input.identify_transfer || base.identify_transfer,
                identify_submission_and_metadata: input.identify_submission_and_metadata
                    || base.identify_submission_and_metadata,
                identify_before_normalization: input.identify_before_normalization
                    || base.identify_before_normalization,
                normalize: input.normalize || base.normalize,
                transcribe_files: input.transcribe_files || base.transcribe_files,
                perform_policy_checks_on_originals: input.perform_policy_checks_on_originals
                    || base.perform_policy_checks_on_originals,
                perform_policy_checks_on_preservation_derivatives: input
                    .perform_policy_checks_on_preservation_derivatives
                    || base.perform_policy_checks_on_preservation_derivatives,
                perform_policy_checks_on_access_derivatives: input
                    .perform_policy_checks_on_access_derivatives
                    || base.perform_policy_checks_on_access_derivatives,
                thumbnail_mode: if input.thumbnail_mode != 0 {
                    input.thumbnail_mode
                } else {
                    base.thumbnail_mode
                },
                aip_compression_level: if input.aip_compression_level != 0 {
                    input.aip_compression_level
                } else {
                    base.aip_compression_level
                },
                aip_compression_algorithm: if input.aip_compression_algorithm != 0 {
                    input.aip_compression_algorithm
                } else {
                    base.aip_compression_algorithm
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_merges_to_defaults() {
        let partial = PreservationConfig {
            compress_aip: false,
            a3m: ProcessingConfig::default(),
        };
        assert_eq!(partial.merge_with_defaults(), PreservationConfig::default());
    }

    #[test]
    fn booleans_are_or_merged() {
        let mut partial = PreservationConfig {
            compress_aip: true,
            a3m: ProcessingConfig::default(),
        };
        partial.a3m.examine_contents = true;

        let merged = partial.merge_with_defaults();
        assert!(merged.compress_aip);
        // Explicitly enabled flag sticks.
        assert!(merged.a3m.examine_contents);
        // Defaults that are true cannot be disabled through the merge.
        assert!(merged.a3m.normalize);
    }

    #[test]
    fn non_zero_fields_override() {
        let mut partial = PreservationConfig::default();
        partial.a3m.thumbnail_mode = processing_config::ThumbnailMode::DoNotGenerate as i32;
        partial.a3m.aip_compression_level = 5;

        let merged = partial.merge_with_defaults();
        assert_eq!(
            merged.a3m.thumbnail_mode,
            processing_config::ThumbnailMode::DoNotGenerate as i32
        );
        assert_eq!(merged.a3m.aip_compression_level, 5);
    }

    #[test]
    fn zero_fields_keep_defaults() {
        let mut partial = PreservationConfig::default();
        partial.a3m.thumbnail_mode = 0;
        partial.a3m.aip_compression_level = 0;
        partial.a3m.aip_compression_algorithm = 0;

        let merged = partial.merge_with_defaults();
        assert_eq!(
            merged.a3m.thumbnail_mode,
            processing_config::ThumbnailMode::Generate as i32
        );
        assert_eq!(merged.a3m.aip_compression_level, 1);
        assert_eq!(
            merged.a3m.aip_compression_algorithm,
            processing_config::AipCompressionAlgorithm::S7Copy as i32
        );
    }

    #[test]
    fn partial_json_deserialises_with_defaults() {
        // A missing a3m_config falls back to the full default flag set.
        let parsed: PreservationConfig =
            serde_json::from_str(r#"{"compress_aip": true}"#).unwrap();
        assert!(parsed.compress_aip);
        assert_eq!(parsed.a3m, default_processing_config());

        // A partial a3m_config zero-fills the rest; the merge restores the
        // defaults.
        let parsed: PreservationConfig =
            serde_json::from_str(r#"{"a3m_config": {"examine_contents": true}}"#).unwrap();
        assert!(parsed.a3m.examine_contents);
        assert!(!parsed.a3m.normalize);
        let merged = parsed.merge_with_defaults();
        assert!(merged.a3m.examine_contents);
        assert!(merged.a3m.normalize);
    }
}
