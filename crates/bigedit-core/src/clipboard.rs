//! Clipboard boundary.
//!
//! The core exchanges UTF-8 text plus one bit with the host: whether the
//! payload came from a rectangular selection. The bit travels with the text
//! (the host stores it in a side-channel next to the platform clipboard) and
//! decides paste semantics. An unavailable clipboard is a no-op, never an
//! error.

/// Text payload plus the rectangular-selection marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPayload {
    /// The UTF-8 text.
    pub text: String,
    /// True iff the source was a rectangular multi-cursor selection.
    pub rectangular: bool,
}

impl ClipboardPayload {
    /// A plain (non-rectangular) payload.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rectangular: false,
        }
    }

    /// A rectangular payload.
    pub fn rectangular(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rectangular: true,
        }
    }
}

/// Host-provided clipboard transport.
pub trait Clipboard {
    /// Read the current payload; `None` when the clipboard is unavailable
    /// or empty (paste becomes a no-op).
    fn read(&mut self) -> Option<ClipboardPayload>;

    /// Store a payload.
    fn write(&mut self, payload: ClipboardPayload);
}

/// In-process clipboard used by tests and the terminal host.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    payload: Option<ClipboardPayload>,
}

impl MemoryClipboard {
    /// An empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for MemoryClipboard {
    fn read(&mut self) -> Option<ClipboardPayload> {
        self.payload.clone()
    }

    fn write(&mut self, payload: ClipboardPayload) {
        self.payload = Some(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clipboard_round_trip() {
        let mut clipboard = MemoryClipboard::new();
        assert!(clipboard.read().is_none());

        clipboard.write(ClipboardPayload::rectangular("a\nb"));
        let payload = clipboard.read().unwrap();
        assert_eq!(payload.text, "a\nb");
        assert!(payload.rectangular);
    }
}
