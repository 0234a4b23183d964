//! Format specifications: `format(value, spec)`, f-string `{x:spec}` and
//! printf-style `str % args`.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::runtime::value::format_float as repr_float;

// ============================================================================
// Spec Parsing
// ============================================================================

/// A parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    /// Padding character
    pub fill: char,
    /// `<`, `>`, `^` or `=`; `None` picks the type's default
    pub align: Option<char>,
    /// `+`, `-` or space
    pub sign: char,
    /// `#`: radix prefixes, keep trailing zeros
    pub alternate: bool,
    /// Minimum width
    pub width: usize,
    /// `,` or `_` thousands separator
    pub grouping: Option<char>,
    /// Digits after the point, or maximum string length
    pub precision: Option<usize>,
    /// Presentation type
    pub kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

impl FormatSpec {
    /// Parses a spec, or returns the `ValueError` message.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut i = 0;
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                parsed.sign = c;
                i += 1;
            }
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if parsed.align.is_none() {
                parsed.fill = '0';
                parsed.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            parsed.width = chars[start..i].iter().collect::<String>().parse().map_err(|_| "Too many decimal digits in format string")?;
        }
        if let Some(&c) = chars.get(i) {
            if c == ',' || c == '_' {
                parsed.grouping = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return Err("Format specifier missing precision".into());
            }
            parsed.precision =
                Some(chars[start..i].iter().collect::<String>().parse().map_err(|_| "Too many decimal digits in format string")?);
        }
        match chars.len() - i {
            0 => {}
            1 => parsed.kind = Some(chars[i]),
            _ => return Err("Invalid format specifier".into()),
        }
        Ok(parsed)
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn pad(body: &str, sign: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = body.chars().count() + sign.chars().count();
    if len >= spec.width {
        return format!("{}{}", sign, body);
    }
    let padding = spec.width - len;
    let fill = |n: usize| spec.fill.to_string().repeat(n);
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", sign, body, fill(padding)),
        '^' => format!("{}{}{}{}", fill(padding / 2), sign, body, fill(padding - padding / 2)),
        '=' => format!("{}{}{}", sign, fill(padding), body),
        _ => format!("{}{}{}", fill(padding), sign, body),
    }
}

fn sign_prefix(negative: bool, spec: &FormatSpec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    let count = digits.chars().count();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

/// Renders a string.
pub fn format_str(text: &str, spec: &FormatSpec) -> Result<String, String> {
    match spec.kind {
        None | Some('s') => {}
        Some(kind) => return Err(format!("Unknown format code '{}' for object of type 'str'", kind)),
    }
    if spec.sign != '-' {
        return Err("Sign not allowed in string format specifier".into());
    }
    let body: String = match spec.precision {
        Some(precision) => text.chars().take(precision).collect(),
        None => text.to_string(),
    };
    Ok(pad(&body, "", spec, '<'))
}

/// Renders an integer.
pub fn format_int(n: &BigInt, spec: &FormatSpec) -> Result<String, String> {
    let (radix, prefix) = match spec.kind {
        None | Some('d') | Some('n') => (10, ""),
        Some('x') => (16, "0x"),
        Some('X') => (16, "0X"),
        Some('o') => (8, "0o"),
        Some('b') => (2, "0b"),
        Some('c') => {
            let c = n
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| "%c arg not in range(0x110000)".to_string())?;
            return Ok(pad(&c.to_string(), "", spec, '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
            return format_float(n.to_f64().unwrap_or(f64::INFINITY), spec);
        }
        Some(kind) => return Err(format!("Unknown format code '{}' for object of type 'int'", kind)),
    };
    if spec.precision.is_some() {
        return Err("Precision not allowed in integer format specifier".into());
    }
    let mut digits = n.abs().to_str_radix(radix);
    if spec.kind == Some('X') {
        digits = digits.to_uppercase();
    }
    if let Some(separator) = spec.grouping {
        digits = group_digits(&digits, separator, if radix == 10 { 3 } else { 4 });
    }
    let sign = sign_prefix(n.is_negative(), spec);
    let prefix = if spec.alternate { prefix } else { "" };
    let sign = format!("{}{}", sign, prefix);
    Ok(pad(&digits, &sign, spec, '>'))
}

/// Exponent notation with a two-digit signed exponent: `1.5e+03`.
fn exponent_form(x: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, x);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let out = format!("{}e{}{:0>2}", mantissa, sign, digits);
    if upper { out.to_uppercase() } else { out }
}

fn strip_trailing_zeros(text: &str) -> String {
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{}e{}", strip_trailing_zeros(mantissa), exponent),
        None if text.contains('.') => text.trim_end_matches('0').trim_end_matches('.').to_string(),
        None => text.to_string(),
    }
}

fn general_form(x: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    if x == 0.0 {
        return if alternate { format!("{:.*}", precision - 1, 0.0) } else { "0".into() };
    }
    let rounded = exponent_form(x, precision - 1, false);
    let exponent: i32 = rounded.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0);
    let text = if exponent >= -4 && exponent < precision as i32 {
        format!("{:.*}", (precision as i32 - 1 - exponent).max(0) as usize, x)
    } else {
        exponent_form(x, precision - 1, upper)
    };
    if alternate { text } else { strip_trailing_zeros(&text) }
}

/// Renders a float.
pub fn format_float(x: f64, spec: &FormatSpec) -> Result<String, String> {
    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let mut body = if magnitude.is_nan() || magnitude.is_infinite() {
        let word = if magnitude.is_nan() { "nan" } else { "inf" };
        if upper { word.to_uppercase() } else { word.to_string() }
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => exponent_form(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general_form(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(precision) => general_form(magnitude, precision, spec.alternate, false),
                None => repr_float(magnitude),
            },
            Some(kind) => return Err(format!("Unknown format code '{}' for object of type 'float'", kind)),
        }
    };
    if let Some(separator) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        let (int_part, rest) = body.split_at(split);
        body = format!("{}{}", group_digits(int_part, separator, 3), rest);
    }
    Ok(pad(&body, sign_prefix(negative, spec), spec, '>'))
}

// ============================================================================
// printf-style Formatting
// ============================================================================

/// One `%` conversion in a printf-style template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PercentPiece {
    /// Literal text
    Literal(String),
    /// A conversion: spec plus the conversion character
    Conversion(FormatSpec, char),
}

/// Splits a printf-style template into literal and conversion pieces.
pub fn parse_percent(template: &str) -> Result<Vec<PercentPiece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        let mut spec = FormatSpec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.align = Some('<'),
                '0' => {
                    if spec.align.is_none() {
                        spec.fill = '0';
                        spec.align = Some('=');
                    }
                }
                '+' | ' ' => spec.sign = flag,
                '#' => spec.alternate = true,
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        spec.width = width.parse().unwrap_or(0);
        if spec.align.is_none() {
            spec.align = Some('>');
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                precision.push(d);
                chars.next();
            }
            spec.precision = Some(precision.parse().unwrap_or(0));
        }
        let conversion = chars.next().ok_or_else(|| "incomplete format".to_string())?;
        if !matches!(conversion, 's' | 'r' | 'a' | 'd' | 'i' | 'u' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c') {
            return Err(format!("unsupported format character '{}'", conversion));
        }
        if !literal.is_empty() {
            pieces.push(PercentPiece::Literal(std::mem::take(&mut literal)));
        }
        pieces.push(PercentPiece::Conversion(spec, conversion));
    }
    if !literal.is_empty() {
        pieces.push(PercentPiece::Literal(literal));
    }
    Ok(pieces)
}

/// Returns true if `n` is zero; used to reject `%c` of empty input.
pub fn is_zero(n: &BigInt) -> bool {
    n.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> FormatSpec {
        FormatSpec::parse(s).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let parsed = spec("*^10.3f");
        assert_eq!(parsed.fill, '*');
        assert_eq!(parsed.align, Some('^'));
        assert_eq!(parsed.width, 10);
        assert_eq!(parsed.precision, Some(3));
        assert_eq!(parsed.kind, Some('f'));
        assert!(FormatSpec::parse(".f").is_err());
        assert!(FormatSpec::parse("dd").is_err());
    }

    #[test]
    fn test_format_int() {
        assert_eq!(format_int(&BigInt::from(42), &spec("5d")).unwrap(), "   42");
        assert_eq!(format_int(&BigInt::from(255), &spec("#x")).unwrap(), "0xff");
        assert_eq!(format_int(&BigInt::from(-7), &spec("04")).unwrap(), "-007");
        assert_eq!(format_int(&BigInt::from(1234567), &spec(",")).unwrap(), "1,234,567");
        assert_eq!(format_int(&BigInt::from(5), &spec("<3")).unwrap(), "5  ");
        assert!(format_int(&BigInt::from(5), &spec(".2d")).is_err());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.14159, &spec(".2f")).unwrap(), "3.14");
        assert_eq!(format_float(1234.5, &spec("e")).unwrap(), "1.234500e+03");
        assert_eq!(format_float(0.5, &spec("%")).unwrap(), "50.000000%");
        assert_eq!(format_float(0.0001, &spec("g")).unwrap(), "0.0001");
        assert_eq!(format_float(1e20, &spec("g")).unwrap(), "1e+20");
        assert_eq!(format_float(2.0, &spec("+08.2f")).unwrap(), "+0002.00");
        assert_eq!(format_float(1.5, &spec("")).unwrap(), "1.5");
    }

    #[test]
    fn test_format_str() {
        assert_eq!(format_str("ab", &spec(">4")).unwrap(), "  ab");
        assert_eq!(format_str("abcdef", &spec(".3")).unwrap(), "abc");
        assert_eq!(format_str("ab", &spec("^6")).unwrap(), "  ab  ");
        assert!(format_str("ab", &spec("d")).is_err());
    }

    #[test]
    fn test_parse_percent() {
        let pieces = parse_percent("%-4d|%5.1f%%").unwrap();
        assert_eq!(pieces.len(), 4);
        assert!(matches!(&pieces[0], PercentPiece::Conversion(s, 'd') if s.width == 4 && s.align == Some('<')));
        assert_eq!(pieces[3], PercentPiece::Literal("%".into()));
        assert!(parse_percent("%q").is_err());
    }
}
