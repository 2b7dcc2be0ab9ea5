//! LogBlob: large text artifacts owned by an Iteration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Build,
    Console,
}

/// Compressed build stdout/stderr or console capture, owned by the
/// iteration+host pair that produced it and removed with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogBlob {
    pub id: Uuid,
    pub iteration_id: Uuid,
    pub host_id: String,
    pub kind: LogKind,
    /// Uncompressed size in bytes, recorded so a reader never has to
    /// decompress just to know how large the artifact was.
    pub size: u64,
    pub compressed_bytes: Vec<u8>,
    /// Only meaningful for `LogKind::Build`.
    pub exit_code: Option<i32>,
    /// SHA-256 of the uncompressed content, checked on read.
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_blob_has_no_exit_code_by_convention() {
        let blob = LogBlob {
            id: Uuid::new_v4(),
            iteration_id: Uuid::new_v4(),
            host_id: "h1".into(),
            kind: LogKind::Console,
            size: 0,
            compressed_bytes: Vec::new(),
            exit_code: None,
            checksum: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".into(),
        };
        assert_eq!(blob.kind, LogKind::Console);
        assert!(blob.exit_code.is_none());
    }
}
