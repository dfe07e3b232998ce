//! Splits one SHDR frame into fields honouring quoted/escaped pipe
//! delimiters (§6.1).

/// Tokenizes one line on `|`. A field may be quoted with `"..."`, inside
/// which a literal `|` is written `\|`. Leading/trailing ASCII whitespace on
/// each field is stripped; a trailing `|` yields a final empty field. A
/// field that opens a quote but never closes it degrades the *entire* line
/// to a raw split on unescaped `|`, preserving backslashes literally.
///
/// Performs no semantic interpretation: the caller resolves keys, values and
/// categories downstream.
pub fn tokenize(line: &str) -> Vec<String> {
    if has_unterminated_quote(line) {
        return raw_split(line);
    }

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes && chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '|' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());

    fields
}

fn has_unterminated_quote(line: &str) -> bool {
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes && chars.peek() == Some(&'|') => {
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            _ => {}
        }
    }
    in_quotes
}

fn raw_split(line: &str) -> Vec<String> {
    line.split('|').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_fields() {
        assert_eq!(tokenize("a|b|c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn trailing_pipe_yields_empty_field() {
        assert_eq!(tokenize("a|b|"), vec!["a", "b", ""]);
    }

    #[test]
    fn quoted_field_allows_escaped_pipe() {
        assert_eq!(tokenize(r#"a|"b\|c"|d"#), vec!["a", "b|c", "d"]);
    }

    #[test]
    fn trims_whitespace_around_fields() {
        assert_eq!(tokenize(" a | b |c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn unterminated_quote_degrades_to_raw_split() {
        assert_eq!(tokenize(r#"a|"b|c"#), vec!["a", "\"b", "c"]);
    }

    #[test]
    fn round_trips_fields_without_special_chars() {
        let input = "a|bee|see";
        let tokens = tokenize(input);
        assert_eq!(tokens.join("|"), input);
    }
}
