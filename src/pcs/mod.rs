//! BaiduPCS-Go integration
//!
//! The wrapped program is driven through three protocol layers:
//!
//! - [`login`]: an interactive prompt/response session, one [`LoginStep`] per
//!   round-trip, bounded by a fixed end-of-prompt sentinel.
//! - [`transfer`]: a download whose progress and exit status are streamed as
//!   `INC-PROTO-BEGIN ... INC-PROTO-END` framed JSON messages.
//! - [`client`]: one-shot account commands (`who`, `ls`, `transfer`, ...)
//!   whose whole output is parsed after exit.
//!
//! [`LoginStep`]: crate::types::LoginStep

pub mod client;
pub mod login;
pub mod transfer;

pub use client::{PanEntry, PcsClient, TransferRecord};
pub use login::{LoginFlow, LoginSession, classify_prompt};
pub use transfer::{FrameBuffer, Message, Transfer};

use regex::Regex;

/// First capture group of `pattern` in `text`, if any
pub(crate) fn first_capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_capture_stops_at_line_end() {
        let text = "1: 手机: 138****0000\n2: 邮箱: a@b.com\n";
        assert_eq!(
            first_capture(r"1: 手机: (.*)\n", text).as_deref(),
            Some("138****0000")
        );
        assert_eq!(first_capture(r"3: 其他: (.*)\n", text), None);
    }
}
