//! Format-aware conversion of values to text (`<x; format="upper">`).
//!
//! Renderers are looked up by a value's exact type name; unlike model
//! adaptors there is no inheritance.

use std::fmt::Write;

use chrono::NaiveDateTime;

use crate::value::Value;

pub trait AttributeRenderer: Send + Sync {
    /// `format` is the value of the `format` option, if any.
    fn render(&self, value: &Value, format: Option<&str>, culture: &Culture) -> String;
}

/// Order of the day, month and year fields in short dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    MonthDayYear,
    DayMonthYear,
    YearMonthDay,
}

/// Number and date conventions of a locale, looked up by tag (`en-US`,
/// `de_DE`). Tags are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Culture {
    tag: &'static str,
    decimal: char,
    grouping: char,
    date_order: DateOrder,
    date_separator: char,
}

const CULTURES: &[Culture] = &[
    Culture::known("en-US", '.', ',', DateOrder::MonthDayYear, '/'),
    Culture::known("en-GB", '.', ',', DateOrder::DayMonthYear, '/'),
    Culture::known("de-DE", ',', '.', DateOrder::DayMonthYear, '.'),
    Culture::known("fr-FR", ',', ' ', DateOrder::DayMonthYear, '/'),
    Culture::known("es-ES", ',', '.', DateOrder::DayMonthYear, '/'),
    Culture::known("it-IT", ',', '.', DateOrder::DayMonthYear, '/'),
    Culture::known("ja-JP", '.', ',', DateOrder::YearMonthDay, '/'),
    Culture::known("", '.', ',', DateOrder::MonthDayYear, '/'),
];

impl Culture {
    const fn known(tag: &'static str, decimal: char, grouping: char, date_order: DateOrder, date_separator: char) -> Self {
        Self {
            tag,
            decimal,
            grouping,
            date_order,
            date_separator,
        }
    }

    /// `None` when the tag names no known culture. The empty tag is the
    /// invariant culture.
    pub fn from_tag(tag: &str) -> Option<Culture> {
        let tag = tag.trim().replace('_', "-");
        CULTURES.iter().find(|c| c.tag.eq_ignore_ascii_case(&tag)).cloned()
    }

    pub fn invariant() -> Culture {
        Self::known("", '.', ',', DateOrder::MonthDayYear, '/')
    }

    pub fn tag(&self) -> &str {
        self.tag
    }

    pub fn decimal_separator(&self) -> char {
        self.decimal
    }

    pub fn group_separator(&self) -> char {
        self.grouping
    }

    fn short_date(&self) -> String {
        let sep = self.date_separator;
        match self.date_order {
            DateOrder::MonthDayYear => format!("%m{sep}%d{sep}%Y"),
            DateOrder::DayMonthYear => format!("%d{sep}%m{sep}%Y"),
            DateOrder::YearMonthDay => format!("%Y{sep}%m{sep}%d"),
        }
    }

    /// Rewrites a `1234.5` style number with this culture's separators,
    /// grouping the integer digits when `group` is set.
    fn localize(&self, number: &str, group: bool) -> String {
        let (sign, digits) = match number.strip_prefix(['-', '+']) {
            Some(rest) => (&number[..1], rest),
            None => ("", number),
        };
        let (int, frac) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits, None),
        };
        let mut out = String::from(sign);
        if group && int.chars().all(|c| c.is_ascii_digit()) {
            for (i, c) in int.chars().enumerate() {
                if i > 0 && (int.len() - i) % 3 == 0 {
                    out.push(self.grouping);
                }
                out.push(c);
            }
        } else {
            out.push_str(int);
        }
        if let Some(frac) = frac {
            out.push(self.decimal);
            out.push_str(frac);
        }
        out
    }
}

impl Default for Culture {
    fn default() -> Self {
        Self::known("en-US", '.', ',', DateOrder::MonthDayYear, '/')
    }
}

/// Handles `upper`, `lower`, `cap`, `url-encode` and `xml-encode`; any other
/// format is applied as a pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringRenderer;

impl AttributeRenderer for StringRenderer {
    fn render(&self, value: &Value, format: Option<&str>, culture: &Culture) -> String {
        let s = value.to_string();
        let Some(format) = format else {
            return s;
        };
        match format {
            "upper" => s.to_uppercase(),
            "lower" => s.to_lowercase(),
            "cap" => {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => s,
                }
            }
            "url-encode" => url_encode(&s),
            "xml-encode" => xml_encode(&s),
            pattern => apply_pattern(pattern, value, culture),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NumberRenderer;

impl AttributeRenderer for NumberRenderer {
    fn render(&self, value: &Value, format: Option<&str>, culture: &Culture) -> String {
        match (format, value) {
            (Some(pattern), _) => apply_pattern(pattern, value, culture),
            (None, Value::Float(_)) => culture.localize(&value.to_string(), false),
            (None, _) => value.to_string(),
        }
    }
}

/// Dates take `short`, `medium`, `long`, `full`, optionally prefixed with
/// `date:` or `time:`, or a custom `yyyy-MM-dd HH:mm:ss` style pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateRenderer;

impl DateRenderer {
    fn strftime(format: &str, culture: &Culture) -> String {
        match format {
            "short" => format!("{} %H:%M", culture.short_date()),
            "medium" => "%b %-d, %Y %-I:%M:%S %p".to_string(),
            "long" => "%B %-d, %Y %-I:%M:%S %p".to_string(),
            "full" => "%A, %d %B %Y %H:%M:%S".to_string(),
            "date:short" => culture.short_date(),
            "date:medium" => "%b %-d, %Y".to_string(),
            "date:long" => "%B %-d, %Y".to_string(),
            "date:full" => "%A, %B %-d, %Y".to_string(),
            "time:short" => "%-I:%M %p".to_string(),
            "time:medium" | "time:long" | "time:full" => "%-I:%M:%S %p".to_string(),
            custom => translate_date_pattern(custom),
        }
    }

    fn format(date: &NaiveDateTime, format: Option<&str>, culture: &Culture) -> String {
        let pattern = Self::strftime(format.unwrap_or("short"), culture);
        let mut out = String::new();
        match write!(out, "{}", date.format(&pattern)) {
            Ok(()) => out,
            Err(_) => date.to_string(),
        }
    }
}

impl AttributeRenderer for DateRenderer {
    fn render(&self, value: &Value, format: Option<&str>, culture: &Culture) -> String {
        match value {
            Value::Date(d) => Self::format(d, format, culture),
            other => other.to_string(),
        }
    }
}

/// Maps `yyyy MM dd HH mm ss` style fields onto strftime.
fn translate_date_pattern(pattern: &str) -> String {
    const FIELDS: [(&str, &str); 12] = [
        ("yyyy", "%Y"),
        ("yy", "%y"),
        ("MMMM", "%B"),
        ("MMM", "%b"),
        ("MM", "%m"),
        ("dddd", "%A"),
        ("dd", "%d"),
        ("HH", "%H"),
        ("hh", "%I"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("tt", "%p"),
    ];
    let mut out = String::new();
    let mut rest = pattern;
    'outer: while !rest.is_empty() {
        for (field, spec) in FIELDS {
            if let Some(tail) = rest.strip_prefix(field) {
                out.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'*' | b'(' | b')' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{:02x}", b);
            }
        }
    }
    out
}

fn xml_encode(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Applies a printf-style (`%5d`, `%,.2f`, `%x`, `%s`) or positional
/// (`{0}`, `{0,6}`) pattern to one value. Patterns with neither are returned
/// as they are. `,` groups digits; separators follow `culture`.
pub fn apply_pattern(pattern: &str, value: &Value, culture: &Culture) -> String {
    if pattern.contains('%') {
        printf(pattern, value, culture)
    } else if pattern.contains("{0") {
        positional(pattern, value, culture)
    } else {
        pattern.to_string()
    }
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    group: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{}{}", body, " ".repeat(fill))
        } else if self.zero {
            match body.strip_prefix('-') {
                Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
                None => format!("{}{}", "0".repeat(fill), body),
            }
        } else {
            format!("{}{}", " ".repeat(fill), body)
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(x) => Some(x.trunc() as i64),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn convert(spec: &Spec, conversion: char, value: &Value, culture: &Culture) -> String {
    let body = match conversion {
        'd' => match as_i64(value) {
            Some(i) if spec.plus && i >= 0 => format!("+{}", culture.localize(&i.to_string(), spec.group)),
            Some(i) => culture.localize(&i.to_string(), spec.group),
            None => value.to_string(),
        },
        'x' => as_i64(value).map_or_else(|| value.to_string(), |i| format!("{:x}", i)),
        'X' => as_i64(value).map_or_else(|| value.to_string(), |i| format!("{:X}", i)),
        'f' => match as_f64(value) {
            Some(x) => {
                let s = culture.localize(&format!("{:.*}", spec.precision.unwrap_or(6), x), spec.group);
                if spec.plus && x >= 0.0 {
                    format!("+{}", s)
                } else {
                    s
                }
            }
            None => value.to_string(),
        },
        _ => {
            let s = value.to_string();
            match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
    };
    spec.pad(body)
}

fn printf(pattern: &str, value: &Value, culture: &Culture) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ',' => spec.group = true,
                _ => break,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            spec.precision = Some(p);
        }
        match chars.next() {
            Some(conversion) => out.push_str(&convert(&spec, conversion, value, culture)),
            None => out.push('%'),
        }
    }
    out
}

fn positional(pattern: &str, value: &Value, culture: &Culture) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(open) = rest.find("{0") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let inner = &after[..close];
        let mut spec = Spec::default();
        let (alignment, precision) = match inner.split_once(':') {
            Some((a, p)) => (a, Some(p)),
            None => (inner, None),
        };
        if let Some(width) = alignment.strip_prefix(',') {
            let width = width.trim();
            spec.left = width.starts_with('-');
            spec.width = width.trim_start_matches('-').parse().unwrap_or(0);
        }
        let body = match precision {
            Some(p) if p.starts_with("0.") => match as_f64(value) {
                Some(x) => culture.localize(&format!("{:.*}", p.len() - 2, x), false),
                None => value.to_string(),
            },
            _ => value.to_string(),
        };
        out.push_str(&spec.pad(body));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_string_formats() {
        let us = Culture::default();
        let r = StringRenderer;
        let v = Value::from("hi there");
        assert_eq!(r.render(&v, Some("upper"), &us), "HI THERE");
        assert_eq!(r.render(&v, Some("cap"), &us), "Hi there");
        assert_eq!(r.render(&Value::from(""), Some("cap"), &us), "");
        assert_eq!(r.render(&Value::from("a b"), Some("url-encode"), &us), "a+b");
        assert_eq!(r.render(&Value::from("a<b> &\t"), Some("xml-encode"), &us), "a&lt;b&gt; &amp;\t");
        assert_eq!(r.render(&Value::from("hi"), Some("{0,6}"), &us), "    hi");
        assert_eq!(r.render(&v, None, &us), "hi there");
    }

    #[test]
    fn test_printf_subset() {
        let us = Culture::default();
        let apply_pattern = |p: &str, v: &Value| apply_pattern(p, v, &us);
        assert_eq!(apply_pattern("%d", &Value::Int(-2100)), "-2100");
        assert_eq!(apply_pattern("%5d", &Value::Int(42)), "   42");
        assert_eq!(apply_pattern("%-5d|", &Value::Int(42)), "42   |");
        assert_eq!(apply_pattern("%05d", &Value::Int(-42)), "-0042");
        assert_eq!(apply_pattern("%x", &Value::Int(255)), "ff");
        assert_eq!(apply_pattern("%.2f", &Value::Float(3.14159)), "3.14");
        assert_eq!(apply_pattern("%s!", &Value::from("hi")), "hi!");
        assert_eq!(apply_pattern("100%%", &Value::Int(1)), "100%");
    }

    #[test]
    fn test_positional_patterns() {
        let us = Culture::default();
        assert_eq!(NumberRenderer.render(&Value::Float(3.14159), Some("{0:0.000}"), &us), "3.142");
        assert_eq!(NumberRenderer.render(&Value::Int(-2100), Some("{0}"), &us), "-2100");
        assert_eq!(NumberRenderer.render(&Value::Int(7), None, &us), "7");
    }

    #[test]
    fn test_dates() {
        let date = NaiveDate::from_ymd_opt(2005, 7, 5)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let us = Culture::default();
        let v = Value::from(date);
        assert_eq!(DateRenderer.render(&v, None, &us), "07/05/2005 00:00");
        assert_eq!(DateRenderer.render(&v, Some("yyyy.MM.dd"), &us), "2005.07.05");
        assert_eq!(DateRenderer.render(&v, Some("date:medium"), &us), "Jul 5, 2005");
        assert_eq!(DateRenderer.render(&v, Some("time:medium"), &us), "12:00:00 AM");
        assert_eq!(DateRenderer.render(&v, Some("full"), &us), "Tuesday, 05 July 2005 00:00:00");
    }

    #[test]
    fn test_culture_tags() {
        assert_eq!(Culture::from_tag("de_DE").map(|c| c.decimal_separator()), Some(','));
        assert_eq!(Culture::from_tag("EN-gb").map(|c| c.tag().to_string()), Some("en-GB".to_string()));
        assert_eq!(Culture::from_tag(""), Some(Culture::invariant()));
        assert!(Culture::from_tag("xx-NOPE").is_none());
    }

    #[test]
    fn test_numbers_follow_culture() {
        let de = Culture::from_tag("de-DE").unwrap();
        let us = Culture::default();
        assert_eq!(apply_pattern("%,d", &Value::Int(-1234567), &us), "-1,234,567");
        assert_eq!(apply_pattern("%,d", &Value::Int(1234567), &de), "1.234.567");
        assert_eq!(apply_pattern("%,.2f", &Value::Float(12345.678), &de), "12.345,68");
        assert_eq!(NumberRenderer.render(&Value::Float(3.5), None, &de), "3,5");
        assert_eq!(NumberRenderer.render(&Value::Float(3.14159), Some("{0:0.00}"), &de), "3,14");
    }

    #[test]
    fn test_short_dates_follow_culture() {
        let date = NaiveDate::from_ymd_opt(2005, 7, 5)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        let v = Value::from(date);
        let de = Culture::from_tag("de-DE").unwrap();
        let jp = Culture::from_tag("ja-JP").unwrap();
        assert_eq!(DateRenderer.render(&v, Some("date:short"), &de), "05.07.2005");
        assert_eq!(DateRenderer.render(&v, None, &jp), "2005/07/05 09:30");
    }
}
