#![forbid(unsafe_code)]

//! Escaping of character data while it is written to canonical output.
//!
//! Every character that needs a reference is ASCII, so the input is scanned
//! bytewise and untouched runs are copied in one piece.

/// Where a piece of character data lands in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Text node content.
    Text,
    /// A double-quoted attribute or namespace value.
    Attribute,
    /// Processing instruction data.
    Instruction,
}

impl Context {
    fn replacement(self, byte: u8) -> Option<&'static [u8]> {
        match (self, byte) {
            (Context::Text | Context::Attribute, b'&') => Some(b"&amp;"),
            (Context::Text | Context::Attribute, b'<') => Some(b"&lt;"),
            (Context::Text, b'>') => Some(b"&gt;"),
            (Context::Attribute, b'"') => Some(b"&quot;"),
            (Context::Attribute, b'\t') => Some(b"&#x9;"),
            (Context::Attribute, b'\n') => Some(b"&#xA;"),
            (_, b'\r') => Some(b"&#xD;"),
            _ => None,
        }
    }
}

/// Append `s` to `out`, replacing the characters `ctx` requires.
pub fn write_escaped(out: &mut Vec<u8>, s: &str, ctx: Context) {
    let bytes = s.as_bytes();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(rep) = ctx.replacement(b) {
            out.extend_from_slice(&bytes[start..i]);
            out.extend_from_slice(rep);
            start = i + 1;
        }
    }
    out.extend_from_slice(&bytes[start..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped(s: &str, ctx: Context) -> String {
        let mut out = Vec::new();
        write_escaped(&mut out, s, ctx);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_text() {
        assert_eq!(escaped("a&b<c>d\"e\tf", Context::Text), "a&amp;b&lt;c&gt;d\"e\tf");
        assert_eq!(escaped("line\rend", Context::Text), "line&#xD;end");
    }

    #[test]
    fn test_attribute() {
        assert_eq!(escaped("a>b\"c&d<", Context::Attribute), "a>b&quot;c&amp;d&lt;");
        assert_eq!(escaped("a\tb\nc\rd", Context::Attribute), "a&#x9;b&#xA;c&#xD;d");
    }

    #[test]
    fn test_instruction_only_touches_cr() {
        assert_eq!(escaped("x<&>\ry", Context::Instruction), "x<&>&#xD;y");
    }

    #[test]
    fn test_appends_and_keeps_multibyte() {
        let mut out = b"<a>".to_vec();
        write_escaped(&mut out, "smörgås & räka", Context::Text);
        assert_eq!(out, "<a>smörgås &amp; räka".as_bytes());
    }
}
