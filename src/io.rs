use std::io::Write;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Serializes an object to a pretty-printed JSON file.
pub fn object_to_json<T: Serialize>(output_path: impl AsRef<Path>, object: &T) -> Result<()> {
    let j = serde_json::to_string_pretty(object)?;
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(j.as_bytes())?;
    Ok(())
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let contents = std::fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&contents)?)
}
