//! Device metadata package inspection
//!
//! A `.devicemetadata-ms` package is a cabinet archive. The descriptor at
//! `DeviceInformation/DeviceInfo.xml` names the manufacturer, the model and an
//! icon file stored next to it. Entry names inside the cabinet use `\` as the
//! separator and are matched case-insensitively.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

use super::{RemoteMetadata, TransientIcon};
use crate::errors::{RemoteError, RemoteResult};

pub const DESCRIPTOR_PATH: &str = "DeviceInformation/DeviceInfo.xml";
const DESCRIPTOR_DIR: &str = "DeviceInformation";

/// Fields read from `DeviceInfo.xml`; text is trimmed and empty values are absent
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub device_icon_file: Option<String>,
}

/// Decode text that may be UTF-16 (with BOM) or UTF-8 (with or without BOM)
pub fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xff, 0xfe, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xfe, 0xff, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xef, 0xbb, 0xbf, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [b'<', 0, ..] => decode_utf16(bytes, u16::from_le_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Read the three fields of interest from a descriptor document
pub fn parse_device_info(bytes: &[u8]) -> RemoteResult<DeviceInfo> {
    let content = decode_text(bytes);
    let mut reader = Reader::from_str(&content);

    let mut info = DeviceInfo::default();
    let mut depth = 0usize;
    let mut field: Option<String> = None;
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                saw_root = true;
                // Direct children of the root element only
                if depth == 2 {
                    field = Some(element_name(e.local_name().as_ref())?);
                    text.clear();
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2
                    && let Some(name) = field.take()
                {
                    let value = non_empty(&text);
                    match name.as_str() {
                        "Manufacturer" => info.manufacturer = value,
                        "ModelName" => info.model_name = value,
                        "DeviceIconFile" => info.device_icon_file = value,
                        _ => {}
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let chunk = std::str::from_utf8(&e)
                        .map_err(|e| RemoteError::invalid_descriptor(format!("invalid UTF-8 in text: {e}")))?;
                    text.push_str(chunk);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    let chunk = std::str::from_utf8(&e)
                        .map_err(|e| RemoteError::invalid_descriptor(format!("invalid UTF-8 in CDATA: {e}")))?;
                    text.push_str(chunk);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if field.is_some() {
                    let name = std::str::from_utf8(&e)
                        .map_err(|e| RemoteError::invalid_descriptor(format!("invalid UTF-8 in reference: {e}")))?;
                    text.push_str(&resolve_reference(name)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RemoteError::invalid_descriptor(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(RemoteError::invalid_descriptor("document has no root element"));
    }
    Ok(info)
}

fn element_name(bytes: &[u8]) -> RemoteResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| RemoteError::invalid_descriptor(format!("invalid UTF-8 in element name: {e}")))
}

fn resolve_reference(name: &str) -> RemoteResult<String> {
    if let Some(code) = name.strip_prefix('#') {
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => code.parse::<u32>(),
        };
        return value
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| RemoteError::invalid_descriptor(format!("invalid character reference &{name};")));
    }

    quick_xml::escape::resolve_predefined_entity(name)
        .map(str::to_string)
        .ok_or_else(|| RemoteError::invalid_descriptor(format!("unknown entity &{name};")))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalized, lowercase lookup key for a cabinet entry name
fn entry_key(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_lowercase()
}

/// Relative path for an entry, refusing anything that could escape the target directory
fn safe_relative_path(name: &str) -> RemoteResult<PathBuf> {
    let normalized = name.replace('\\', "/");
    let path = Path::new(&normalized);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(RemoteError::invalid_archive(format!(
                    "entry {name} escapes the extraction directory"
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(RemoteError::invalid_archive(format!("entry {name:?} has no file name")));
    }
    Ok(relative)
}

/// Cabinet contents unpacked into a directory deleted on drop
struct ExtractedArchive {
    _dir: TempDir,
    entries: HashMap<String, PathBuf>,
}

impl ExtractedArchive {
    fn extract(data: &[u8]) -> RemoteResult<Self> {
        let mut cabinet = cab::Cabinet::new(Cursor::new(data))
            .map_err(|e| RemoteError::invalid_archive(e.to_string()))?;

        let mut names = Vec::new();
        for folder in cabinet.folder_entries() {
            for file in folder.file_entries() {
                names.push(file.name().to_string());
            }
        }

        let dir = tempfile::Builder::new().prefix("devicemetadata").tempdir()?;
        let mut entries = HashMap::with_capacity(names.len());

        for name in names {
            let relative = safe_relative_path(&name)?;
            let target = dir.path().join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut reader = cabinet
                .read_file(&name)
                .map_err(|e| RemoteError::invalid_archive(format!("{name}: {e}")))?;
            let mut contents = Vec::new();
            reader
                .read_to_end(&mut contents)
                .map_err(|e| RemoteError::invalid_archive(format!("{name}: {e}")))?;
            std::fs::write(&target, contents)?;

            entries.insert(entry_key(&name), target);
        }

        debug!("Unpacked {} archive entries into {}", entries.len(), dir.path().display());
        Ok(Self { _dir: dir, entries })
    }

    fn find(&self, name: &str) -> Option<&Path> {
        self.entries.get(&entry_key(name)).map(PathBuf::as_path)
    }
}

/// Unpack a package and read its descriptor and icon. Blocking.
pub fn inspect_archive(data: &[u8]) -> RemoteResult<RemoteMetadata> {
    let archive = ExtractedArchive::extract(data)?;

    let descriptor_path = archive
        .find(DESCRIPTOR_PATH)
        .ok_or_else(|| RemoteError::MissingDescriptor {
            path: DESCRIPTOR_PATH.to_string(),
        })?;
    let info = parse_device_info(&std::fs::read(descriptor_path)?)?;

    let icon = match info.device_icon_file.as_deref() {
        Some(icon_file) => {
            let entry = format!("{DESCRIPTOR_DIR}/{icon_file}");
            match archive.find(&entry) {
                Some(path) => Some(copy_to_transient(path)?),
                None => {
                    warn!("Descriptor references icon {} which is not in the archive", icon_file);
                    None
                }
            }
        }
        None => None,
    };

    Ok(RemoteMetadata {
        vendor_name: info.manufacturer,
        product_name: info.model_name,
        icon,
    })
}

fn copy_to_transient(source: &Path) -> RemoteResult<TransientIcon> {
    let mut temp = tempfile::Builder::new()
        .prefix("icon")
        .suffix(".ico")
        .tempfile()?;
    let mut input = std::fs::File::open(source)?;
    std::io::copy(&mut input, temp.as_file_mut())?;
    Ok(TransientIcon::new(NamedTempFile::into_temp_path(temp)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const DEVICE_INFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<DeviceInfo xmlns="http://schemas.microsoft.com/windows/DeviceMetadata/DeviceInfo/2007/11/">
  <DeviceCategoryList>
    <DeviceCategory>Input.Mouse</DeviceCategory>
  </DeviceCategoryList>
  <ModelName>  MX518 Gaming Mouse </ModelName>
  <DeviceIconFile>mouse.ico</DeviceIconFile>
  <Manufacturer>Logitech</Manufacturer>
</DeviceInfo>
"#;

    /// Build an uncompressed cabinet from (name, contents) pairs
    pub(crate) fn build_cab(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = cab::CabinetBuilder::new();
        {
            let folder = builder.add_folder(cab::CompressionType::None);
            for (name, _) in files {
                folder.add_file(*name);
            }
        }
        let mut writer = builder.build(Cursor::new(Vec::new())).unwrap();
        let mut index = 0;
        while let Some(mut file) = writer.next_file().unwrap() {
            file.write_all(files[index].1).unwrap();
            index += 1;
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_parse_device_info() {
        let info = parse_device_info(DEVICE_INFO.as_bytes()).unwrap();
        assert_eq!(info.manufacturer.as_deref(), Some("Logitech"));
        assert_eq!(info.model_name.as_deref(), Some("MX518 Gaming Mouse"));
        assert_eq!(info.device_icon_file.as_deref(), Some("mouse.ico"));
    }

    #[test]
    fn test_parse_prefixed_and_escaped_descriptor() {
        let document = r#"<?xml version="1.0"?>
<di:DeviceInfo xmlns:di="http://schemas.microsoft.com/windows/DeviceMetadata/DeviceInfo/2007/11/">
  <di:Manufacturer>Tom &amp; Jerry&#x2122;</di:Manufacturer>
  <di:ModelName>   </di:ModelName>
</di:DeviceInfo>"#;

        let info = parse_device_info(document.as_bytes()).unwrap();
        assert_eq!(info.manufacturer.as_deref(), Some("Tom & Jerry\u{2122}"));
        assert_eq!(info.model_name, None);
        assert_eq!(info.device_icon_file, None);
    }

    #[test]
    fn test_parse_utf16_descriptor() {
        let mut bytes = vec![0xff, 0xfe];
        for unit in DEVICE_INFO.replace("utf-8", "utf-16").encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }

        let info = parse_device_info(&bytes).unwrap();
        assert_eq!(info.manufacturer.as_deref(), Some("Logitech"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_device_info(b"not xml at all"),
            Err(RemoteError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            parse_device_info(b"<DeviceInfo><ModelName>x</DeviceInfo>"),
            Err(RemoteError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_inspect_archive_with_icon() {
        let cab = build_cab(&[
            ("PackageInfo.xml", b"<PackageInfo/>"),
            ("DeviceInformation\\DeviceInfo.xml", DEVICE_INFO.as_bytes()),
            ("DeviceInformation\\Mouse.ICO", b"icon bytes"),
        ]);

        let metadata = inspect_archive(&cab).unwrap();
        assert_eq!(metadata.vendor_name.as_deref(), Some("Logitech"));
        assert_eq!(metadata.product_name.as_deref(), Some("MX518 Gaming Mouse"));

        let icon = metadata.icon.expect("icon should be extracted");
        let icon_path = icon.path().to_path_buf();
        assert_eq!(std::fs::read(&icon_path).unwrap(), b"icon bytes");

        drop(icon);
        assert!(!icon_path.exists());
    }

    #[test]
    fn test_inspect_archive_with_missing_icon_file() {
        let cab = build_cab(&[("DeviceInformation\\DeviceInfo.xml", DEVICE_INFO.as_bytes())]);

        let metadata = inspect_archive(&cab).unwrap();
        assert!(metadata.icon.is_none());
        assert_eq!(metadata.vendor_name.as_deref(), Some("Logitech"));
    }

    #[test]
    fn test_inspect_archive_without_descriptor() {
        let cab = build_cab(&[("PackageInfo.xml", b"<PackageInfo/>")]);

        assert!(matches!(
            inspect_archive(&cab),
            Err(RemoteError::MissingDescriptor { .. })
        ));
    }

    #[test]
    fn test_inspect_rejects_non_cabinet() {
        assert!(matches!(
            inspect_archive(b"PK\x03\x04 this is a zip"),
            Err(RemoteError::InvalidArchive { .. })
        ));
    }

    #[test]
    fn test_entries_cannot_escape_extraction_dir() {
        assert!(safe_relative_path("..\\..\\etc\\passwd").is_err());
        assert!(safe_relative_path("/etc/passwd").is_err());
        assert_eq!(
            safe_relative_path("DeviceInformation\\DeviceInfo.xml").unwrap(),
            PathBuf::from("DeviceInformation/DeviceInfo.xml")
        );
    }
}
