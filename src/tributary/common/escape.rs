use std::fmt::Write;


/// Writes s to out as a safely escaped single-quoted MySQL string literal.
pub fn escape_str(out: &mut String, s: &str) {
    // Escape single quotes by doubling them up, and backslashes since MySQL treats them as escapes
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Returns ident wrapped in backticks, with embedded backticks doubled.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('`');
    for c in ident.chars() {
        if c == '`' {
            out.push('`'); // double it up to escape it
        }
        out.push(c);
    }
    out.push('`');
    out
}

#[macro_export]
macro_rules! sql {
    ($f: expr, $($args: expr),+) => {
        {
            let mut out = String::new();
            let mut rest: &str = $f;
            $(
                let i = rest.find("{}").expect("too many arguments for the number of formatting placeholders");
                out.push_str(&rest[..i]);
                $crate::tributary::common::SqlArg::write_sql(&$args, &mut out);
                rest = &rest[i+2..];
            )+
            if rest.contains("{}") {
                panic!("too few arguments for the number of formatting placeholders");
            }
            out.push_str(rest);
            out
        }
    };
}

/// A value that can be interpolated into a statement by the sql! macro.
/// Strings are escaped and quoted, numbers are written as is.
pub trait SqlArg {
    fn write_sql(&self, out: &mut String);
}

impl SqlArg for &str {
    fn write_sql(&self, out: &mut String) {
        escape_str(out, self);
    }
}

impl SqlArg for String {
    fn write_sql(&self, out: &mut String) {
        escape_str(out, self.as_str());
    }
}

impl SqlArg for u64 {
    fn write_sql(&self, out: &mut String) {
        let _ = write!(out, "{}", self);
    }
}
