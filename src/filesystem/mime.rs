//! Content-type classification

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const SNIFF_LEN: u64 = 8 * 1024;

/// Classification for content that cannot be inspected
pub const UNREADABLE: &str = "application/octet-stream";

/// Classifies a path into a MIME type string.
///
/// Called from the blocking pool, so implementations may do synchronous I/O.
pub trait MimeClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> io::Result<String>;
}

/// Extension lookup through `mime_guess`, falling back to sniffing the first bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct GuessingClassifier;

impl MimeClassifier for GuessingClassifier {
    fn classify(&self, path: &Path) -> io::Result<String> {
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            return Ok("inode/directory".to_string());
        }

        if let Some(guess) = mime_guess::from_path(path).first_raw() {
            return Ok(guess.to_string());
        }

        let mut head = Vec::new();
        let read = File::open(path).and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut head));
        match read {
            Ok(_) => Ok(sniff(&head).to_string()),
            // Listed and stat-able but not readable: still a file worth showing
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(UNREADABLE.to_string()),
            Err(e) => Err(e),
        }
    }
}

fn sniff(head: &[u8]) -> &'static str {
    if head.is_empty() {
        "inode/x-empty"
    } else if !head.contains(&0) && looks_like_utf8(head) {
        "text/plain"
    } else {
        UNREADABLE
    }
}

// The sniff window may cut a multi-byte sequence in half.
fn looks_like_utf8(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() as u64 == SNIFF_LEN,
    }
}
