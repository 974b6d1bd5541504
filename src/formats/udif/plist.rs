//! Minimal XML property list scanner. We only care about the base64
//! `<data>` blobs of the `blkx` array, so there's no need for a full
//! plist parser.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

use crate::{ImageError, ImageResult};

/// Return the decoded `<data>` entries of the `blkx` array found in
/// `plist`, or `None` if there's no such array.
pub fn blkx_tables(plist: &str) -> ImageResult<Option<Vec<Vec<u8>>>> {
    static PATTERNS: OnceLock<Result<(Regex, Regex), regex::Error>> = OnceLock::new();

    let (array, data) = PATTERNS
        .get_or_init(|| {
            Ok((
                Regex::new(r"(?s)<key>\s*blkx\s*</key>\s*<array>(.*?)</array>")?,
                Regex::new(r"(?s)<data>(.*?)</data>")?,
            ))
        })
        .as_ref()
        .map_err(|e| ImageError::CorruptResourceFork(e.to_string()))?;

    let array = match array.captures(plist) {
        Some(c) => c,
        None => return Ok(None),
    };

    let mut tables = Vec::new();

    for blob in data.captures_iter(&array[1]) {
        let b64: String = blob[1].chars().filter(|c| !c.is_whitespace()).collect();

        let table = STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| ImageError::CorruptResourceFork(format!("bad base64 block table: {}", e)))?;

        tables.push(table);
    }

    Ok(Some(tables))
}

#[cfg(test)]
mod test {
    use super::*;

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>resource-fork</key>
	<dict>
		<key>blkx</key>
		<array>
			<dict>
				<key>Attributes</key>
				<string>0x0050</string>
				<key>Data</key>
				<data>
				bWlz
				aA==
				</data>
			</dict>
			<dict>
				<key>Data</key>
				<data>AAEC</data>
			</dict>
		</array>
		<key>plst</key>
		<array>
			<dict>
				<key>Data</key>
				<data>/w==</data>
			</dict>
		</array>
	</dict>
</dict>
</plist>
"#;

    #[test]
    fn blkx_data() {
        let tables = blkx_tables(PLIST).unwrap().unwrap();

        assert_eq!(tables, vec![b"mish".to_vec(), vec![0, 1, 2]]);
    }

    #[test]
    fn no_blkx() {
        assert!(blkx_tables("<plist><dict></dict></plist>").unwrap().is_none());
    }

    #[test]
    fn bad_base64() {
        let plist = "<key>blkx</key><array><data>@@@</data></array>";

        assert!(blkx_tables(plist).is_err());
    }
}
