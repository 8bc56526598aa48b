//! Parser for the linux-usb.org `usb.ids` registry
//!
//! The vendor section looks like:
//!
//! ```text
//! # comment
//! 1d6b  Linux Foundation
//! 	0001  1.1 root hub
//! 	0002  2.0 root hub
//! 		00  interface lines are ignored
//! ```
//!
//! Later sections (`C 00  ...`, `HID ...`) start with a non-hex header, which
//! closes the vendor section so their indented lines are never read as products.

use crate::models::RegistryRecord;

/// Vendors and products read from one registry file
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedRegistry {
    pub vendors: Vec<(u16, String)>,
    pub products: Vec<RegistryRecord>,
}

/// Parse the registry text. Malformed lines are skipped.
pub fn parse_usb_ids(content: &str) -> ParsedRegistry {
    let mut registry = ParsedRegistry::default();
    let mut current_vendor: Option<(u16, String)> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(vendor_id) = parse_hex_id(line, 0) {
            let vendor_name = name_after(line, 4);
            registry.vendors.push((vendor_id, vendor_name.clone()));
            current_vendor = Some((vendor_id, vendor_name));
            continue;
        }

        if let Some(rest) = line.strip_prefix('\t') {
            let Some((vendor_id, vendor_name)) = &current_vendor else {
                continue;
            };
            if let Some(product_id) = parse_hex_id(rest, 0) {
                registry.products.push(RegistryRecord {
                    vendor_id: *vendor_id,
                    vendor_name: vendor_name.clone(),
                    product_id,
                    product_name: name_after(rest, 4),
                });
            }
            continue;
        }

        // Any other top-level line starts a non-vendor section
        current_vendor = None;
    }

    registry
}

/// Four lowercase hex digits at `start`
fn parse_hex_id(line: &str, start: usize) -> Option<u16> {
    let digits = line.get(start..start + 4)?;
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

fn name_after(line: &str, offset: usize) -> String {
    line.get(offset..).unwrap_or_default().trim().to_string()
}
