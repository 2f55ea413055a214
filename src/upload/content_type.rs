//! Media type and header parameter parsing

/// A parsed `type/subtype; param=value` header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercased `type/subtype`
    pub essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    /// Parse a Content-Type header value. Returns `None` if there is no `type/subtype`.
    pub fn parse(value: &str) -> Option<Self> {
        let (essence, rest) = value.split_once(';').unwrap_or((value, ""));
        let essence = essence.trim().to_ascii_lowercase();

        let (top, sub) = essence.split_once('/')?;
        if top.is_empty() || sub.is_empty() || sub.contains('/') {
            return None;
        }

        Some(Self {
            essence,
            params: parse_params(rest),
        })
    }

    /// Look up a parameter by case-insensitive name
    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }

    /// `image/*`
    pub fn is_image(&self) -> bool {
        self.essence.starts_with("image/")
    }

    /// `multipart/form-data`
    pub fn is_form_data(&self) -> bool {
        self.essence == "multipart/form-data"
    }

    /// Non-empty `boundary` parameter
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }
}

/// Case-insensitive lookup in a parsed parameter list
pub fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parse `; key=value; key="quoted; value"` parameter lists.
///
/// Names are lowercased. Quoted values may contain `;` and backslash escapes.
/// A parameter without `=` is kept with an empty value.
pub fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }

        let name_end = rest.find(|c: char| c == '=' || c == ';').unwrap_or(rest.len());
        let name = rest[..name_end].trim().to_ascii_lowercase();
        rest = &rest[name_end..];

        let value = match rest.strip_prefix('=') {
            Some(after_eq) => {
                let after_eq = after_eq.trim_start();
                if let Some(quoted) = after_eq.strip_prefix('"') {
                    let (value, remaining) = read_quoted(quoted);
                    rest = remaining;
                    value
                } else {
                    let end = after_eq.find(';').unwrap_or(after_eq.len());
                    let value = after_eq[..end].trim().to_string();
                    rest = &after_eq[end..];
                    value
                }
            }
            None => String::new(),
        };

        if !name.is_empty() {
            params.push((name, value));
        }
    }

    params
}

/// Read a quoted string whose opening quote was already consumed.
/// An unterminated quote runs to the end of input.
fn read_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut escaped = false;

    for (idx, c) in input.char_indices() {
        if escaped {
            value.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return (value, &input[idx + 1..]),
            _ => value.push(c),
        }
    }

    (value, "")
}
