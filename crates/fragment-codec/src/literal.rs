//! Structured literal encoder: the only way a dynamic value enters a fragment.

use serde::Serialize;

use pagebridge_core_types::BridgeResult;

/// Encode `value` as a JavaScript expression that evaluates to the same data.
///
/// The output is JSON with the characters that can terminate or confuse an
/// embedding context escaped: U+2028/U+2029 (line terminators in older
/// engines) and `<` (closes a surrounding `<script>` element).
pub fn encode_literal<T>(value: &T) -> BridgeResult<String>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len() + 8);
    for ch in json.chars() {
        match ch {
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            '<' => out.push_str("\\u003c"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn quotes_cannot_break_out_of_the_literal() {
        let hostile = r#""); fetch("https://evil.test"); (""#;
        let encoded = encode_literal(hostile).unwrap();
        assert!(encoded.starts_with('"') && encoded.ends_with('"'));
        let back: String = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, hostile);
    }

    #[test]
    fn script_terminators_and_line_separators_are_escaped() {
        let encoded = encode_literal("</script>\u{2028}\u{2029}").unwrap();
        assert!(!encoded.contains('<'));
        assert!(!encoded.contains('\u{2028}'));
        assert!(!encoded.contains('\u{2029}'));
        assert_eq!(encoded, r#""\u003c/script>\u2028\u2029""#);
        let back: String = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, "</script>\u{2028}\u{2029}");
    }

    #[test]
    fn nested_values_survive_encoding() {
        let value = json!({ "db": "my-db", "limit": 50, "tags": ["a<b", null] });
        let encoded = encode_literal(&value).unwrap();
        let back: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, value);
    }
}
