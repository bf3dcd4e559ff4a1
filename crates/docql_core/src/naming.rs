//! Typename inflection.
//!
//! Fields that do not name their type explicitly get one derived from the
//! field name: one trailing `s` is dropped and the rest is PascalCased, so
//! `users` becomes `User` and `line_items` becomes `LineItem`. Generated
//! client types depend on this exact rule.

/// Returns `explicit` if given, else the typename derived from `field_name`.
pub fn resolve_typename(explicit: Option<&str>, field_name: &str) -> String {
    match explicit {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => pascal_case(singularize(field_name)),
    }
}

/// Strips one trailing `s` or `S`.
fn singularize(name: &str) -> &str {
    name.strip_suffix(['s', 'S']).unwrap_or(name)
}

/// Converts a name to PascalCase.
///
/// Words are split on non-alphanumeric characters and on case transitions.
/// Each word is capitalized and the rest of it lowercased.
pub fn pascal_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for word in split_words(name) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            result.extend(first.to_uppercase());
            result.extend(chars.flat_map(char::to_lowercase));
        }
    }
    result
}

fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // `fooBar` splits before `B`; `HTTPRequest` splits before `R`.
            if prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
