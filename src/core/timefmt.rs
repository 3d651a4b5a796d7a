//! Joda-style date patterns (`YYYY-MM-dd_HHmmss`) rendered through chrono

use chrono::{DateTime, Utc};

/// Translate a Joda-style pattern into a chrono format string
///
/// Runs of the same letter form one field; text inside single quotes is
/// literal and `''` is an escaped quote. Unknown pattern letters are rejected.
pub fn to_chrono_format(pattern: &str) -> Result<String, String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '\'')
                .ok_or_else(|| format!("unterminated quote in pattern '{}'", pattern))?;
            for &ch in &chars[i + 1..i + 1 + close] {
                push_literal(&mut out, ch);
            }
            i += close + 2;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&ch| ch == c).count();
        let spec = match (c, run) {
            ('Y' | 'y', 2) => "%y",
            ('Y' | 'y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('D', _) => "%j",
            ('Z', _) => "%z",
            _ => return Err(format!("unsupported pattern letter '{}' in '{}'", c, pattern)),
        };
        out.push_str(spec);
        i += run;
    }

    Ok(out)
}

fn push_literal(out: &mut String, ch: char) {
    if ch == '%' {
        out.push_str("%%");
    } else {
        out.push(ch);
    }
}

/// Render an instant with a Joda-style pattern
pub fn format_instant(instant: DateTime<Utc>, pattern: &str) -> Result<String, String> {
    let format = to_chrono_format(pattern)?;
    Ok(instant.format(&format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 7, 9, 5, 42).unwrap()
    }

    #[test]
    fn test_output_directory_pattern() {
        assert_eq!(
            format_instant(instant(), "YYYY-MM-dd_HHmmss").unwrap(),
            "2015-03-07_090542"
        );
    }

    #[test]
    fn test_short_fields_and_names() {
        assert_eq!(format_instant(instant(), "d/M/yy").unwrap(), "7/3/15");
        assert_eq!(format_instant(instant(), "EEE MMM").unwrap(), "Sat Mar");
    }

    #[test]
    fn test_quoted_literals() {
        assert_eq!(
            format_instant(instant(), "'run at' HH'h' ''").unwrap(),
            "run at 09h '"
        );
        assert_eq!(format_instant(instant(), "dd%").unwrap(), "07%");
    }

    #[test]
    fn test_rejects_unknown_letters() {
        assert!(to_chrono_format("QQ").is_err());
        assert!(to_chrono_format("'open").is_err());
    }
}
