//! Terminal output cleanup for captured agent text.

use std::sync::LazyLock;

use regex::Regex;

static ANSI_CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]").unwrap());
static ANSI_OSC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)").unwrap());
static ANSI_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b(\(B|\)0)").unwrap());
static SPINNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏][ \t]*").unwrap());
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());

/// Strip color/style and cursor-movement escapes, spinner glyphs, carriage
/// returns and other control characters. Newlines and tabs are kept.
pub fn sanitize(text: &str) -> String {
    let text = ANSI_OSC.replace_all(text, "");
    let text = ANSI_CSI.replace_all(&text, "");
    let text = ANSI_CHARSET.replace_all(&text, "");
    let text = SPINNER.replace_all(&text, "");
    let text = CONTROL_CHARS.replace_all(&text, "");
    text.replace('\r', "")
}
