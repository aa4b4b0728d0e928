// On-disk ensemble format: a directory holding `obj.json` (the
// structured ensemble), `categories` and `join_keys_encoding`
// (length-prefixed UTF-8 strings in host byte order) and
// `metadata.json` recording the endianness. Readers never swap; a
// byte-order mismatch is refused at open.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::containers::Encoding;
use crate::ensemble::FeatureEnsemble;
use crate::error::{EngineError, Result};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    endianness: String,
    format_version: u32,
}

fn host_endianness() -> &'static str {
    if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    }
}

fn write_encoding(path: &Path, encoding: &Encoding) -> Result<()> {
    let mut file = fs::File::create(path)?;
    let strings = encoding.snapshot();

    file.write_all(&(strings.len() as u64).to_ne_bytes())?;
    for s in strings {
        let bytes = s.as_bytes();
        file.write_all(&(bytes.len() as u64).to_ne_bytes())?;
        file.write_all(bytes)?;
    }
    Ok(())
}

fn read_encoding(path: &Path) -> Result<Encoding> {
    let mut file = fs::File::open(path)?;

    let mut len_buffer = [0u8; 8];
    file.read_exact(&mut len_buffer)?;
    let count = u64::from_ne_bytes(len_buffer) as usize;

    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        file.read_exact(&mut len_buffer)?;
        let len = u64::from_ne_bytes(len_buffer) as usize;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        strings.push(String::from_utf8(bytes).map_err(|e| {
            EngineError::Serialization(format!("invalid UTF-8 in encoding file: {}", e))
        })?);
    }

    Ok(Encoding::from_strings(strings))
}

impl FeatureEnsemble {
    /// Persists the ensemble and the two project encodings into `dir`.
    pub fn save(
        &self,
        dir: impl AsRef<Path>,
        categories: &Encoding,
        join_keys: &Encoding,
    ) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let metadata = Metadata {
            endianness: host_endianness().to_string(),
            format_version: FORMAT_VERSION,
        };
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        fs::write(dir.join("obj.json"), serde_json::to_string_pretty(self)?)?;

        write_encoding(&dir.join("categories"), categories)?;
        write_encoding(&dir.join("join_keys_encoding"), join_keys)?;

        Ok(())
    }

    /// Loads an ensemble persisted by `save`. Refuses byte orders other
    /// than the host's.
    pub fn load(dir: impl AsRef<Path>) -> Result<(FeatureEnsemble, Encoding, Encoding)> {
        let dir = dir.as_ref();

        let metadata: Metadata =
            serde_json::from_str(&fs::read_to_string(dir.join("metadata.json"))?)?;

        if metadata.endianness != host_endianness() {
            return Err(EngineError::Serialization(format!(
                "ensemble was written on a {}-endian host; refusing to byte-swap on {}-endian",
                metadata.endianness,
                host_endianness()
            )));
        }

        if metadata.format_version != FORMAT_VERSION {
            return Err(EngineError::Serialization(format!(
                "unsupported format version {}",
                metadata.format_version
            )));
        }

        let ensemble: FeatureEnsemble =
            serde_json::from_str(&fs::read_to_string(dir.join("obj.json"))?)?;

        let categories = read_encoding(&dir.join("categories"))?;
        let join_keys = read_encoding(&dir.join("join_keys_encoding"))?;

        Ok((ensemble, categories, join_keys))
    }
}
