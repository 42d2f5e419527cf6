//! Breakdown dimension labels.
//!
//! A breakdown dimension id has the form `type:key`. Raw-table dimensions (labels,
//! tags) carry a base64-encoded user key; every other type refers to a well-known
//! billing field.

use base64::Engine;

use crate::error::{AlertError, Result};
use crate::types::split_dimension_id;

/// Well-known billing fields and their display labels.
const KEY_LABELS: &[(&str, &str)] = &[
    ("year", "Year"),
    ("quarter", "Quarter"),
    ("month", "Month"),
    ("week", "Week"),
    ("day", "Day"),
    ("cloud_provider", "Cloud"),
    ("billing_account_id", "Billing Account"),
    ("project_ancestry_names", "Folder"),
    ("project_id", "Project/Account ID"),
    ("project_number", "Project/Account number"),
    ("project_name", "Project/Account name"),
    ("service_description", "Service"),
    ("sku_description", "SKU"),
    ("service_id", "Service ID"),
    ("sku_id", "SKU ID"),
    ("operation", "Operation"),
    ("resource_id", "Resource"),
    ("resource_global_id", "Global Resource"),
    ("country", "Country"),
    ("region", "Region"),
    ("zone", "Zone"),
    ("cost_type", "Cost Type"),
    ("pricing_unit", "Unit"),
    ("credit", "Credit"),
    ("savings_description", "Savings Type"),
    ("customer_type", "Customer Type"),
    ("is_marketplace", "Marketplace"),
    ("invoice_month", "Invoice month"),
    ("feature", "Feature"),
    ("attribution", "Attribution"),
    ("attribution_group", "Attribution Group"),
];

/// Looks up the display label of a well-known billing field.
#[must_use]
pub fn key_label(key: &str) -> Option<&'static str> {
    KEY_LABELS
        .iter()
        .find_map(|(k, label)| (*k == key).then_some(*label))
}

/// Resolves the human label of a breakdown dimension id.
///
/// `label:aGVsbG8=` resolves to `hello`; `fixed:service_description` resolves to `Service`.
/// Unknown fixed keys resolve to the key itself.
///
/// # Errors
///
/// Returns `AlertError::InvalidLabelId` if the id is not `type:key`, or if a raw-table
/// key is not valid base64 / UTF-8.
pub fn breakdown_label(dimension_id: &str) -> Result<String> {
    let (filter_type, key) = split_dimension_id(dimension_id)?;

    if filter_type.requires_raw_table() {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .map_err(|e| AlertError::InvalidLabelId {
                id: dimension_id.to_string(),
                reason: format!("failed to decode key: {e}"),
            })?;
        return String::from_utf8(decoded).map_err(|e| AlertError::InvalidLabelId {
            id: dimension_id.to_string(),
            reason: format!("decoded key is not utf-8: {e}"),
        });
    }

    Ok(key_label(key).map_or_else(|| key.to_string(), str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_raw_label() {
        assert_eq!(breakdown_label("label:aGVsbG8=").unwrap(), "hello");
        assert_eq!(breakdown_label("project_label:ZW52").unwrap(), "env");
    }

    #[test]
    fn invalid_base64_fails() {
        let err = breakdown_label("label:not*base64").unwrap_err();
        assert!(matches!(err, AlertError::InvalidLabelId { .. }));
    }

    #[test]
    fn looks_up_fixed_keys() {
        assert_eq!(breakdown_label("fixed:service_description").unwrap(), "Service");
        assert_eq!(breakdown_label("fixed:sku_description").unwrap(), "SKU");
        assert_eq!(breakdown_label("attribution:attribution").unwrap(), "Attribution");
    }

    #[test]
    fn unknown_fixed_key_falls_back() {
        assert_eq!(breakdown_label("fixed:mystery_field").unwrap(), "mystery_field");
    }

    #[test]
    fn malformed_ids_fail() {
        assert!(breakdown_label("service_description").is_err());
        assert!(breakdown_label("fixed:a:b").is_err());
        assert!(breakdown_label("nonsense:key").is_err());
    }

    proptest! {
        #[test]
        fn raw_labels_round_trip(label in "[a-zA-Z0-9 _./-]{1,40}") {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&label);
            let id = format!("tag:{encoded}");
            prop_assert_eq!(breakdown_label(&id).unwrap(), label);
        }
    }
}
