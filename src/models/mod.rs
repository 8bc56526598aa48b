use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SourceFailure;

/// A USB device identified by its vendor and product ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceKey {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Vendor id as four lowercase hex digits, e.g. `046d`
    pub fn vendor_hex(&self) -> String {
        format!("{:04x}", self.vendor_id)
    }

    /// Product id as four lowercase hex digits, e.g. `c01e`
    pub fn product_hex(&self) -> String {
        format!("{:04x}", self.product_id)
    }

    /// File stem shared by cache entries and icon assets: `{vid}_{pid}` in decimal
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor_id, self.product_id)
    }
}

/// Resolved metadata for a device; every field is optional
///
/// Field order is the element order of the cached XML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "DeviceMetadata")]
pub struct DeviceMetadata {
    #[serde(rename = "Icon", default, skip_serializing_if = "Option::is_none")]
    pub icon_uri: Option<String>,
    #[serde(rename = "VendorName", default, skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(rename = "ProductName", default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

impl DeviceMetadata {
    pub fn is_empty(&self) -> bool {
        self.icon_uri.is_none() && self.vendor_name.is_none() && self.product_name.is_none()
    }

    /// True when any of the three fields still needs a value
    pub fn is_incomplete(&self) -> bool {
        self.icon_uri.is_none() || self.vendor_name.is_none() || self.product_name.is_none()
    }

    /// Fill textual fields that are still absent. Present values are never replaced.
    pub fn fill_names(&mut self, vendor_name: Option<String>, product_name: Option<String>) {
        if self.vendor_name.is_none() {
            self.vendor_name = vendor_name;
        }
        if self.product_name.is_none() {
            self.product_name = product_name;
        }
    }
}

/// Names found in the local registry for a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalRecord {
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
}

/// Result of asking one metadata source about a device
#[derive(Debug)]
pub enum SourceOutcome<T> {
    Found(T),
    NotAvailable,
    Failed(SourceFailure),
}

impl<T> SourceOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotAvailable | Self::Failed(_) => None,
        }
    }
}

impl<T, E> From<Result<Option<T>, E>> for SourceOutcome<T>
where
    E: Into<SourceFailure>,
{
    fn from(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(Some(value)) => Self::Found(value),
            Ok(None) => Self::NotAvailable,
            Err(e) => Self::Failed(e.into()),
        }
    }
}

/// Final answer for a device lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub metadata: DeviceMetadata,
    pub found: bool,
}

impl Resolution {
    pub fn new(metadata: DeviceMetadata) -> Self {
        let found = !metadata.is_empty();
        Self { metadata, found }
    }
}

/// One vendor/product line pair from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub vendor_id: u16,
    pub vendor_name: String,
    pub product_id: u16,
    pub product_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FailureKind, LookupError};

    #[test]
    fn test_device_key_formats() {
        let key = DeviceKey::new(1133, 49182);
        assert_eq!(key.vendor_hex(), "046d");
        assert_eq!(key.product_hex(), "c01e");
        assert_eq!(key.file_stem(), "1133_49182");
        assert_eq!(key.to_string(), "1133:49182");

        let small = DeviceKey::new(1, 2);
        assert_eq!(small.vendor_hex(), "0001");
        assert_eq!(small.product_hex(), "0002");
    }

    #[test]
    fn test_fill_names_never_overrides() {
        let mut metadata = DeviceMetadata {
            vendor_name: Some("A".to_string()),
            ..Default::default()
        };
        metadata.fill_names(Some("B".to_string()), Some("Mouse".to_string()));

        assert_eq!(metadata.vendor_name.as_deref(), Some("A"));
        assert_eq!(metadata.product_name.as_deref(), Some("Mouse"));
        assert!(metadata.is_incomplete());
    }

    #[test]
    fn test_resolution_found_flag() {
        assert!(!Resolution::new(DeviceMetadata::default()).found);
        assert!(
            Resolution::new(DeviceMetadata {
                icon_uri: Some("http://localhost/icons/1_2.png".to_string()),
                ..Default::default()
            })
            .found
        );
    }

    #[test]
    fn test_source_outcome_from_result() {
        let found: SourceOutcome<u8> = Ok::<_, LookupError>(Some(1)).into();
        assert!(matches!(found, SourceOutcome::Found(1)));

        let missing: SourceOutcome<u8> = Ok::<_, LookupError>(None).into();
        assert!(matches!(missing, SourceOutcome::NotAvailable));

        let failed: SourceOutcome<u8> =
            Err::<Option<u8>, _>(LookupError::Database(sqlx::Error::PoolClosed)).into();
        match failed {
            SourceOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Transient),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
