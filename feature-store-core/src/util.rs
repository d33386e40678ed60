use anyhow::{Context, Result};

pub fn read_file_to_bytes(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file '{}'", path))
}

/// Compiles a Redis `MATCH` pattern into a [`glob::Pattern`].
///
/// Redis negates classes with `[^..]` and escapes with `\`; glob uses `[!..]`
/// and single-character classes. Runs of `*` collapse to one.
pub fn redis_match_pattern(pattern: &str) -> Result<glob::Pattern> {
    let mut translated = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    if !in_class && matches!(escaped, '*' | '?' | '[' | ']') {
                        translated.push('[');
                        translated.push(escaped);
                        translated.push(']');
                    } else {
                        translated.push(escaped);
                    }
                }
            }
            '[' if !in_class => {
                in_class = true;
                translated.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    translated.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                translated.push(']');
            }
            '*' if !in_class => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                translated.push('*');
            }
            c => translated.push(c),
        }
    }
    glob::Pattern::new(&translated)
        .with_context(|| format!("Invalid match pattern '{}'", pattern))
}
