//! Python naming and literal helpers

const KEYWORDS: [&str; 38] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield", "match", "case", "type",
];

/// `bucketName` -> `bucket_name`, `HTTPServer` -> `http_server`
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '.' || c == ' ' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `bucket_policy` -> `BucketPolicy`
pub fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if matches!(c, '_' | '-' | '.' | ' ') {
            upper = true;
            continue;
        }
        if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// A valid, non-keyword Python identifier for `name`
pub fn python_ident(name: &str) -> String {
    let mut ident: String = snake_case(name)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// Double-quoted Python string literal
pub fn py_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Import alias of a package: `azure-native` -> `azure_native`
pub fn package_alias(package: &str) -> String {
    python_ident(package)
}

/// Distribution name of a package SDK
pub fn distribution_name(package: &str) -> String {
    format!("langhost-{}", package)
}

/// Import name of a package SDK
pub fn import_name(package: &str) -> String {
    format!("langhost_{}", package_alias(package))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_names() {
        assert_eq!(snake_case("bucketName"), "bucket_name");
        assert_eq!(snake_case("HTTPServer"), "http_server");
        assert_eq!(snake_case("ipv6CidrBlock"), "ipv6_cidr_block");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("azure-native"), "azure_native");
    }

    #[test]
    fn identifiers_avoid_keywords_and_digits() {
        assert_eq!(python_ident("lambda"), "lambda_");
        assert_eq!(python_ident("from"), "from_");
        assert_eq!(python_ident("2fa"), "_2fa");
        assert_eq!(python_ident("bucket"), "bucket");
    }

    #[test]
    fn pascal_cases_names() {
        assert_eq!(pascal_case("bucket_policy"), "BucketPolicy");
        assert_eq!(pascal_case("Bucket"), "Bucket");
    }

    #[test]
    fn quotes_strings() {
        assert_eq!(py_str("a\"b\\c\n"), r#""a\"b\\c\n""#);
    }
}
