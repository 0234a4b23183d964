//! `str` construction and methods.
//!
//! Strings are UTF-8; every index a method takes or returns counts
//! characters, not bytes.

use std::sync::Arc;

use unicode_xid::UnicodeXID;

use super::{check_arity, check_method_arity, receiver, str_arg, take_keywords, MethodTable};
use crate::runtime::{Args, Dict, ObjectKind, Value};
use crate::vm::{ascii_escape, Vm, VmResult};

// ============================================================================
// Constructor
// ============================================================================

/// `str(object='')`
pub fn str_new(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "str", &["object"])?;
    check_arity(vm, &args, "str", 0, 1)?;
    match args.positional.first().cloned().or_else(|| keywords[0].clone()) {
        Some(value) => vm.to_str(&value).map(Value::from),
        None => Ok(Value::from("")),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn this_str(vm: &mut Vm, args: &Args, method: &str) -> VmResult<Arc<str>> {
    match receiver(vm, args, method)? {
        Value::Str(s) => Ok(s),
        other => Err(super::wrong_receiver(vm, method, "str", &other)),
    }
}

/// An optional index argument; `None` and missing are the same.
fn opt_index(vm: &mut Vm, args: &Args, index: usize) -> VmResult<Option<i64>> {
    match args.positional.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(value) => vm.index_value(value).map(Some),
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    if text.is_ascii() {
        return chars.min(text.len());
    }
    text.char_indices().nth(chars).map(|(b, _)| b).unwrap_or(text.len())
}

fn char_count(text: &str) -> usize {
    if text.is_ascii() {
        text.len()
    } else {
        text.chars().count()
    }
}

/// The slice of `text` selected by `start`/`end` character indices:
/// `(byte_start, byte_end, char_start)`, or `None` when the window is empty
/// because `start` lies past the end or past `end`.
fn window(text: &str, start: Option<i64>, end: Option<i64>) -> Option<(usize, usize, usize)> {
    let len = char_count(text) as i64;
    let normalize = |i: i64| if i < 0 { (i + len).max(0) } else { i };
    let start = start.map(normalize).unwrap_or(0);
    let end = end.map(normalize).unwrap_or(len).min(len);
    if start > len || end < start {
        return None;
    }
    Some((
        byte_offset(text, start as usize),
        byte_offset(text, end as usize),
        start as usize,
    ))
}

fn find_in(text: &str, sub: &str, start: Option<i64>, end: Option<i64>, reverse: bool) -> i64 {
    let Some((lo, hi, first)) = window(text, start, end) else {
        return -1;
    };
    let haystack = &text[lo..hi];
    let found = if reverse { haystack.rfind(sub) } else { haystack.find(sub) };
    match found {
        Some(pos) => (first + char_count(&haystack[..pos])) as i64,
        None => -1,
    }
}

fn strip_chars(vm: &mut Vm, args: &Args, method: &str, text: &str, left: bool, right: bool) -> VmResult<String> {
    check_method_arity(vm, args, method, 0, 1)?;
    let chars: Option<Vec<char>> = match args.positional.get(1) {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) => Some(s.chars().collect()),
        Some(other) => {
            let type_name = vm.type_name(other);
            return Err(vm.type_error(format!("{} arg must be None or str, not {}", method, type_name)));
        }
    };
    let matches = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut result = text;
    if left {
        result = result.trim_start_matches(matches);
    }
    if right {
        result = result.trim_end_matches(matches);
    }
    Ok(result.to_string())
}

fn fill_char(vm: &mut Vm, args: &Args, index: usize) -> VmResult<char> {
    match args.positional.get(index) {
        None => Ok(' '),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().unwrap_or(' ')),
        Some(Value::Str(_)) => Err(vm.type_error("The fill character must be exactly one character long")),
        Some(other) => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!(
                "The fill character must be a unicode character, not {}",
                type_name
            )))
        }
    }
}

fn prefixes(vm: &mut Vm, value: &Value, method: &str) -> VmResult<Vec<Arc<str>>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Object(obj) if matches!(obj.read().kind, ObjectKind::Tuple(_)) => {
            let mut out = Vec::new();
            for item in vm.collect(value)? {
                match item {
                    Value::Str(s) => out.push(s),
                    other => {
                        let type_name = vm.type_name(&other);
                        return Err(vm.type_error(format!(
                            "tuple for {} must only contain str, not {}",
                            method, type_name
                        )));
                    }
                }
            }
            Ok(out)
        }
        other => {
            let type_name = vm.type_name(other);
            Err(vm.type_error(format!(
                "{} first arg must be str or a tuple of str, not {}",
                method, type_name
            )))
        }
    }
}

// ============================================================================
// Methods
// ============================================================================

/// Methods of `str`.
pub const STR_METHODS: MethodTable = &[
    ("join", str_join),
    ("split", str_split),
    ("rsplit", str_rsplit),
    ("splitlines", str_splitlines),
    ("strip", str_strip),
    ("lstrip", str_lstrip),
    ("rstrip", str_rstrip),
    ("upper", str_upper),
    ("lower", str_lower),
    ("casefold", str_lower),
    ("capitalize", str_capitalize),
    ("title", str_title),
    ("swapcase", str_swapcase),
    ("startswith", str_startswith),
    ("endswith", str_endswith),
    ("find", str_find),
    ("rfind", str_rfind),
    ("index", str_index),
    ("rindex", str_rindex),
    ("count", str_count),
    ("replace", str_replace),
    ("format", str_format),
    ("partition", str_partition),
    ("rpartition", str_rpartition),
    ("center", str_center),
    ("ljust", str_ljust),
    ("rjust", str_rjust),
    ("zfill", str_zfill),
    ("translate", str_translate),
    ("removeprefix", str_removeprefix),
    ("removesuffix", str_removesuffix),
    ("isdigit", str_isdigit),
    ("isdecimal", str_isdigit),
    ("isnumeric", str_isnumeric),
    ("isalpha", str_isalpha),
    ("isalnum", str_isalnum),
    ("isspace", str_isspace),
    ("isupper", str_isupper),
    ("islower", str_islower),
    ("isidentifier", str_isidentifier),
];

/// Static methods of `str`.
pub const STR_STATIC_METHODS: MethodTable = &[("maketrans", str_maketrans)];

/// `sep.join(iterable)`
pub fn str_join(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "join", 1, 1)?;
    let sep = this_str(vm, &args, "join")?;
    let items = vm.collect(&args.positional[1])?;
    let mut parts: Vec<Arc<str>> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s.clone()),
            other => {
                let type_name = vm.type_name(other);
                return Err(vm.type_error(format!(
                    "sequence item {}: expected str instance, {} found",
                    i, type_name
                )));
            }
        }
    }
    Ok(Value::from(parts.join(&*sep)))
}

fn split_args(vm: &mut Vm, mut args: Args, method: &str) -> VmResult<(Arc<str>, Option<Arc<str>>, i64)> {
    let keywords = take_keywords(vm, &mut args, method, &["sep", "maxsplit"])?;
    check_method_arity(vm, &args, method, 0, 2)?;
    let text = this_str(vm, &args, method)?;
    let sep = match args.positional.get(1).cloned().or_else(|| keywords[0].clone()) {
        None | Some(Value::None) => None,
        Some(Value::Str(s)) if s.is_empty() => return Err(vm.value_error("empty separator")),
        Some(value) => Some(str_arg(vm, &value, method)?),
    };
    let maxsplit = match args.positional.get(2).cloned().or_else(|| keywords[1].clone()) {
        Some(value) => vm.index_value(&value)?,
        None => -1,
    };
    Ok((text, sep, maxsplit))
}

/// `str.split(sep=None, maxsplit=-1)`
pub fn str_split(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (text, sep, maxsplit) = split_args(vm, args, "split")?;
    let limit = usize::try_from(maxsplit).ok();
    let parts: Vec<Value> = match &sep {
        Some(sep) => match limit {
            Some(n) => text.splitn(n + 1, &**sep).map(Value::from).collect(),
            None => text.split(&**sep).map(Value::from).collect(),
        },
        None => split_whitespace(&text, limit).into_iter().map(Value::from).collect(),
    };
    Ok(vm.new_list(parts))
}

/// `str.rsplit(sep=None, maxsplit=-1)`
pub fn str_rsplit(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (text, sep, maxsplit) = split_args(vm, args, "rsplit")?;
    let limit = usize::try_from(maxsplit).ok();
    let mut parts: Vec<String> = match &sep {
        Some(sep) => match limit {
            Some(n) => text.rsplitn(n + 1, &**sep).map(str::to_string).collect(),
            None => text.rsplit(&**sep).map(str::to_string).collect(),
        },
        None => {
            let reversed: String = text.chars().rev().collect();
            split_whitespace(&reversed, limit)
                .into_iter()
                .map(|part| part.chars().rev().collect())
                .collect()
        }
    };
    parts.reverse();
    let parts = parts.into_iter().map(Value::from).collect();
    Ok(vm.new_list(parts))
}

/// Whitespace splitting: runs of whitespace separate, leading and trailing
/// whitespace is dropped, and after `limit` splits the rest is kept whole
/// (minus its leading whitespace).
fn split_whitespace(text: &str, limit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| parts.len() >= n) {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

/// `str.splitlines(keepends=False)`
pub fn str_splitlines(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let keywords = take_keywords(vm, &mut args, "splitlines", &["keepends"])?;
    check_method_arity(vm, &args, "splitlines", 0, 1)?;
    let text = this_str(vm, &args, "splitlines")?;
    let keepends = match args.positional.get(1).cloned().or_else(|| keywords[0].clone()) {
        Some(value) => vm.truthy(&value)?,
        None => false,
    };
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
        );
        if !is_break {
            continue;
        }
        let mut end = i + c.len_utf8();
        if c == '\r' {
            if let Some((_, '\n')) = chars.peek() {
                chars.next();
                end += 1;
            }
        }
        let line = if keepends { &text[start..end] } else { &text[start..i] };
        lines.push(Value::from(line));
        start = end;
    }
    if start < text.len() {
        lines.push(Value::from(&text[start..]));
    }
    Ok(vm.new_list(lines))
}

/// `str.strip(chars=None)`
pub fn str_strip(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let text = this_str(vm, &args, "strip")?;
    strip_chars(vm, &args, "strip", &text, true, true).map(Value::from)
}

/// `str.lstrip(chars=None)`
pub fn str_lstrip(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let text = this_str(vm, &args, "lstrip")?;
    strip_chars(vm, &args, "lstrip", &text, true, false).map(Value::from)
}

/// `str.rstrip(chars=None)`
pub fn str_rstrip(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let text = this_str(vm, &args, "rstrip")?;
    strip_chars(vm, &args, "rstrip", &text, false, true).map(Value::from)
}

fn map_text(vm: &mut Vm, args: &Args, method: &str, f: impl FnOnce(&str) -> String) -> VmResult<Value> {
    check_method_arity(vm, args, method, 0, 0)?;
    let text = this_str(vm, args, method)?;
    Ok(Value::from(f(&text)))
}

/// `str.upper()`
pub fn str_upper(vm: &mut Vm, args: Args) -> VmResult<Value> {
    map_text(vm, &args, "upper", str::to_uppercase)
}

/// `str.lower()`
pub fn str_lower(vm: &mut Vm, args: Args) -> VmResult<Value> {
    map_text(vm, &args, "lower", str::to_lowercase)
}

/// `str.capitalize()`
pub fn str_capitalize(vm: &mut Vm, args: Args) -> VmResult<Value> {
    map_text(vm, &args, "capitalize", |text| {
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
            None => String::new(),
        }
    })
}

/// `str.title()`: the first letter of every run of letters is uppercased.
pub fn str_title(vm: &mut Vm, args: Args) -> VmResult<Value> {
    map_text(vm, &args, "title", |text| {
        let mut out = String::with_capacity(text.len());
        let mut previous_cased = false;
        for c in text.chars() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = c.is_alphabetic();
        }
        out
    })
}

/// `str.swapcase()`
pub fn str_swapcase(vm: &mut Vm, args: Args) -> VmResult<Value> {
    map_text(vm, &args, "swapcase", |text| {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if c.is_uppercase() {
                out.extend(c.to_lowercase());
            } else if c.is_lowercase() {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    })
}

fn affix_test(vm: &mut Vm, args: Args, method: &str, suffix: bool) -> VmResult<Value> {
    check_method_arity(vm, &args, method, 1, 3)?;
    let text = this_str(vm, &args, method)?;
    let candidates = prefixes(vm, &args.positional[1], method)?;
    let start = opt_index(vm, &args, 2)?;
    let end = opt_index(vm, &args, 3)?;
    let Some((lo, hi, _)) = window(&text, start, end) else {
        return Ok(Value::Bool(false));
    };
    let haystack = &text[lo..hi];
    let found = candidates.iter().any(|candidate| {
        if suffix {
            haystack.ends_with(&**candidate)
        } else {
            haystack.starts_with(&**candidate)
        }
    });
    Ok(Value::Bool(found))
}

/// `str.startswith(prefix[, start[, end]])`; `prefix` may be a tuple.
pub fn str_startswith(vm: &mut Vm, args: Args) -> VmResult<Value> {
    affix_test(vm, args, "startswith", false)
}

/// `str.endswith(suffix[, start[, end]])`; `suffix` may be a tuple.
pub fn str_endswith(vm: &mut Vm, args: Args) -> VmResult<Value> {
    affix_test(vm, args, "endswith", true)
}

fn search(vm: &mut Vm, args: &Args, method: &str, reverse: bool) -> VmResult<i64> {
    check_method_arity(vm, args, method, 1, 3)?;
    let text = this_str(vm, args, method)?;
    let sub = str_arg(vm, &args.positional[1], method)?;
    let start = opt_index(vm, args, 2)?;
    let end = opt_index(vm, args, 3)?;
    Ok(find_in(&text, &sub, start, end, reverse))
}

/// `str.find(sub[, start[, end]])`: lowest index, or -1.
pub fn str_find(vm: &mut Vm, args: Args) -> VmResult<Value> {
    search(vm, &args, "find", false).map(Value::Int)
}

/// `str.rfind(sub[, start[, end]])`: highest index, or -1.
pub fn str_rfind(vm: &mut Vm, args: Args) -> VmResult<Value> {
    search(vm, &args, "rfind", true).map(Value::Int)
}

/// `str.index(sub[, start[, end]])`: like `find`, raising on failure.
pub fn str_index(vm: &mut Vm, args: Args) -> VmResult<Value> {
    match search(vm, &args, "index", false)? {
        -1 => Err(vm.value_error("substring not found")),
        found => Ok(Value::Int(found)),
    }
}

/// `str.rindex(sub[, start[, end]])`
pub fn str_rindex(vm: &mut Vm, args: Args) -> VmResult<Value> {
    match search(vm, &args, "rindex", true)? {
        -1 => Err(vm.value_error("substring not found")),
        found => Ok(Value::Int(found)),
    }
}

/// `str.count(sub[, start[, end]])`: non-overlapping occurrences.
pub fn str_count(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "count", 1, 3)?;
    let text = this_str(vm, &args, "count")?;
    let sub = str_arg(vm, &args.positional[1], "count")?;
    let start = opt_index(vm, &args, 2)?;
    let end = opt_index(vm, &args, 3)?;
    let count = match window(&text, start, end) {
        None => 0,
        Some((lo, hi, _)) if sub.is_empty() => char_count(&text[lo..hi]) + 1,
        Some((lo, hi, _)) => text[lo..hi].matches(&*sub).count(),
    };
    Ok(Value::Int(count as i64))
}

/// `str.replace(old, new, count=-1)`
pub fn str_replace(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "replace", 2, 3)?;
    let text = this_str(vm, &args, "replace")?;
    let old = str_arg(vm, &args.positional[1], "replace")?;
    let new = str_arg(vm, &args.positional[2], "replace")?;
    let count = match args.positional.get(3) {
        Some(value) => vm.index_value(value)?,
        None => -1,
    };
    let replaced = match usize::try_from(count) {
        Ok(n) => text.replacen(&*old, &new, n),
        Err(_) => text.replace(&*old, &new),
    };
    Ok(Value::from(replaced))
}

fn partition(vm: &mut Vm, args: Args, method: &str, reverse: bool) -> VmResult<Value> {
    check_method_arity(vm, &args, method, 1, 1)?;
    let text = this_str(vm, &args, method)?;
    let sep = str_arg(vm, &args.positional[1], method)?;
    if sep.is_empty() {
        return Err(vm.value_error("empty separator"));
    }
    let found = if reverse { text.rfind(&*sep) } else { text.find(&*sep) };
    let parts = match found {
        Some(pos) => [&text[..pos], &sep[..], &text[pos + sep.len()..]],
        None if reverse => ["", "", &text[..]],
        None => [&text[..], "", ""],
    };
    let items = parts.iter().map(|part| Value::from(*part)).collect();
    Ok(vm.new_tuple(items))
}

/// `str.partition(sep)`
pub fn str_partition(vm: &mut Vm, args: Args) -> VmResult<Value> {
    partition(vm, args, "partition", false)
}

/// `str.rpartition(sep)`
pub fn str_rpartition(vm: &mut Vm, args: Args) -> VmResult<Value> {
    partition(vm, args, "rpartition", true)
}

fn pad(vm: &mut Vm, args: &Args, method: &str) -> VmResult<(Arc<str>, usize, char)> {
    check_method_arity(vm, args, method, 1, 2)?;
    let text = this_str(vm, args, method)?;
    let width = vm.index_value(&args.positional[1])?;
    let fill = fill_char(vm, args, 2)?;
    let missing = (width.max(0) as usize).saturating_sub(char_count(&text));
    Ok((text, missing, fill))
}

fn repeat(fill: char, n: usize) -> String {
    std::iter::repeat(fill).take(n).collect()
}

/// `str.center(width, fillchar=' ')`
pub fn str_center(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (text, missing, fill) = pad(vm, &args, "center")?;
    let width = char_count(&text) + missing;
    let left = missing / 2 + (missing & width & 1);
    let right = missing - left;
    Ok(Value::from(format!("{}{}{}", repeat(fill, left), text, repeat(fill, right))))
}

/// `str.ljust(width, fillchar=' ')`
pub fn str_ljust(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (text, missing, fill) = pad(vm, &args, "ljust")?;
    Ok(Value::from(format!("{}{}", text, repeat(fill, missing))))
}

/// `str.rjust(width, fillchar=' ')`
pub fn str_rjust(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let (text, missing, fill) = pad(vm, &args, "rjust")?;
    Ok(Value::from(format!("{}{}", repeat(fill, missing), text)))
}

/// `str.zfill(width)`: pads with zeros after any sign.
pub fn str_zfill(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "zfill", 1, 1)?;
    let text = this_str(vm, &args, "zfill")?;
    let width = vm.index_value(&args.positional[1])?;
    let missing = (width.max(0) as usize).saturating_sub(char_count(&text));
    let (sign, digits) = match text.chars().next() {
        Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
        _ => (String::new(), &text[..]),
    };
    Ok(Value::from(format!("{}{}{}", sign, "0".repeat(missing), digits)))
}

/// `str.removeprefix(prefix)`
pub fn str_removeprefix(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "removeprefix", 1, 1)?;
    let text = this_str(vm, &args, "removeprefix")?;
    let prefix = str_arg(vm, &args.positional[1], "removeprefix")?;
    Ok(Value::from(text.strip_prefix(&*prefix).unwrap_or(&text)))
}

/// `str.removesuffix(suffix)`
pub fn str_removesuffix(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "removesuffix", 1, 1)?;
    let text = this_str(vm, &args, "removesuffix")?;
    let suffix = str_arg(vm, &args.positional[1], "removesuffix")?;
    Ok(Value::from(text.strip_suffix(&*suffix).unwrap_or(&text)))
}

fn classify(vm: &mut Vm, args: &Args, method: &str, test: impl Fn(&str) -> bool) -> VmResult<Value> {
    check_method_arity(vm, args, method, 0, 0)?;
    let text = this_str(vm, args, method)?;
    Ok(Value::Bool(!text.is_empty() && test(&text)))
}

/// `str.isdigit()`
pub fn str_isdigit(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isdigit", |t| t.chars().all(|c| c.is_ascii_digit()))
}

/// `str.isnumeric()`
pub fn str_isnumeric(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isnumeric", |t| t.chars().all(char::is_numeric))
}

/// `str.isalpha()`
pub fn str_isalpha(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isalpha", |t| t.chars().all(char::is_alphabetic))
}

/// `str.isalnum()`
pub fn str_isalnum(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isalnum", |t| t.chars().all(char::is_alphanumeric))
}

/// `str.isspace()`
pub fn str_isspace(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isspace", |t| t.chars().all(char::is_whitespace))
}

/// `str.isupper()`: has a cased character and no lowercase one.
pub fn str_isupper(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isupper", |t| {
        t.chars().any(char::is_uppercase) && !t.chars().any(char::is_lowercase)
    })
}

/// `str.islower()`
pub fn str_islower(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "islower", |t| {
        t.chars().any(char::is_lowercase) && !t.chars().any(char::is_uppercase)
    })
}

/// `str.isidentifier()`
pub fn str_isidentifier(vm: &mut Vm, args: Args) -> VmResult<Value> {
    classify(vm, &args, "isidentifier", |t| {
        let mut chars = t.chars();
        chars
            .next()
            .is_some_and(|c| c == '_' || UnicodeXID::is_xid_start(c))
            && chars.all(UnicodeXID::is_xid_continue)
    })
}

/// `str.translate(table)`: `table[ord(c)]` replaces `c` with a string, a
/// code point, or nothing for `None`; characters missing from the table are
/// kept.
pub fn str_translate(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "translate", 1, 1)?;
    let text = this_str(vm, &args, "translate")?;
    let table = args.positional[1].clone();
    let lookup_error = crate::builtins::ExceptionKind::LookupError;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let key = Value::Int(c as i64);
        let mapped = match vm.get_item(&table, &key) {
            Ok(mapped) => mapped,
            Err(crate::vm::VmError::Exception(exc)) if vm.exception_is(&exc, lookup_error) => {
                out.push(c);
                continue;
            }
            Err(err) => return Err(err),
        };
        match mapped {
            Value::None => {}
            Value::Str(s) => out.push_str(&s),
            other if other.is_int() => match other.as_i64().and_then(|n| u32::try_from(n).ok()).and_then(char::from_u32) {
                Some(ch) => out.push(ch),
                None => return Err(vm.value_error("character mapping must be in range(0x110000)")),
            },
            _ => return Err(vm.type_error("character mapping must return integer, None or str")),
        }
    }
    Ok(Value::from(out))
}

/// `str.maketrans(x[, y[, z]])`: a translation table for `str.translate`.
pub fn str_maketrans(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "maketrans", 1, 3)?;
    let mut table = Dict::new();
    let mut put = |vm: &mut Vm, key: Value, value: Value| -> VmResult<()> {
        let hashed = vm.hash_key(&key)?;
        table.insert(hashed, key, value);
        Ok(())
    };
    match args.positional.as_slice() {
        [mapping] => {
            for (key, value) in vm.mapping_items(mapping)? {
                let key = match &key {
                    Value::Str(s) if s.chars().count() == 1 => Value::Int(s.chars().next().map_or(0, |c| c as i64)),
                    Value::Str(_) => {
                        return Err(vm.value_error("string keys in translate table must be of length 1"));
                    }
                    k if k.is_int() => key.clone(),
                    _ => return Err(vm.type_error("keys in translate table must be strings or integers")),
                };
                put(vm, key, value)?;
            }
        }
        [from, to, rest @ ..] => {
            let from = str_arg(vm, from, "maketrans")?;
            let to = str_arg(vm, to, "maketrans")?;
            if from.chars().count() != to.chars().count() {
                return Err(vm.value_error("the first two maketrans arguments must have equal length"));
            }
            for (a, b) in from.chars().zip(to.chars()) {
                put(vm, Value::Int(a as i64), Value::Int(b as i64))?;
            }
            if let Some(delete) = rest.first() {
                let delete = str_arg(vm, delete, "maketrans")?;
                for c in delete.chars() {
                    put(vm, Value::Int(c as i64), Value::None)?;
                }
            }
        }
        _ => return Err(vm.type_error("if you give only one argument to maketrans it must be a dict")),
    }
    Ok(vm.new_dict(table))
}

// ============================================================================
// str.format
// ============================================================================

/// `template.format(*args, **kwargs)`
pub fn str_format(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let template = this_str(vm, &args, "format")?;
    let positional = &args.positional[1..];
    let mut auto_index = Some(0usize);
    format_template(vm, &template, positional, &args.keywords, &mut auto_index).map(Value::from)
}

fn format_template(
    vm: &mut Vm,
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    auto_index: &mut Option<usize>,
) -> VmResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(vm.value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        Some('{') => {
                            depth += 1;
                            field.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            field.push('}');
                        }
                        Some(other) => field.push(other),
                        None => return Err(vm.value_error("expected '}' before end of string")),
                    }
                }
                let rendered = render_field(vm, &field, positional, keywords, auto_index)?;
                out.push_str(&rendered);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn render_field(
    vm: &mut Vm,
    field: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    auto_index: &mut Option<usize>,
) -> VmResult<String> {
    // Split `name!conv:spec`; the format spec may itself contain `!` or `:`.
    let (head, spec) = match field.find(':') {
        Some(colon) if !field[..colon].contains('[') || field[..colon].contains(']') => {
            (&field[..colon], &field[colon + 1..])
        }
        _ => (field, ""),
    };
    let (name, conversion) = match head.rfind('!') {
        Some(bang) => (&head[..bang], Some(&head[bang + 1..])),
        None => (head, None),
    };

    let value = resolve_field(vm, name, positional, keywords, auto_index)?;
    let value = match conversion {
        None => value,
        Some("r") => Value::from(vm.repr(&value)?),
        Some("s") => Value::from(vm.to_str(&value)?),
        Some("a") => Value::from(ascii_escape(&vm.repr(&value)?)),
        Some(_) => return Err(vm.value_error("Unknown conversion specifier")),
    };
    let spec = if spec.contains('{') {
        format_template(vm, spec, positional, keywords, auto_index)?
    } else {
        spec.to_string()
    };
    vm.format_value(&value, &spec)
}

fn resolve_field(
    vm: &mut Vm,
    name: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    auto_index: &mut Option<usize>,
) -> VmResult<Value> {
    let first_end = name.find(['.', '[']).unwrap_or(name.len());
    let (first, mut rest) = name.split_at(first_end);

    let mut value = if first.is_empty() {
        let index = match auto_index {
            Some(next) => {
                let index = *next;
                *next += 1;
                index
            }
            None => {
                return Err(vm.value_error("cannot switch from manual field specification to automatic field numbering"))
            }
        };
        positional_field(vm, positional, index)?
    } else if let Ok(index) = first.parse::<usize>() {
        if auto_index.is_some_and(|next| next > 0) {
            return Err(vm.value_error("cannot switch from automatic field numbering to manual field specification"));
        }
        *auto_index = None;
        positional_field(vm, positional, index)?
    } else {
        match keywords.iter().find(|(k, _)| k == first) {
            Some((_, value)) => value.clone(),
            None => return Err(vm.key_error(Value::from(first))),
        }
    };

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let attr = &after[..end];
            value = crate::runtime::ObjectModel::get_attr(vm, &value, attr)?;
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = match after.find(']') {
                Some(end) => end,
                None => return Err(vm.value_error("Missing ']' in format string")),
            };
            let key_text = &after[..end];
            let key = match key_text.parse::<i64>() {
                Ok(n) => Value::Int(n),
                Err(_) => Value::from(key_text),
            };
            value = vm.get_item(&value, &key)?;
            rest = &after[end + 1..];
        } else {
            return Err(vm.value_error("Only '.' or '[' may follow ']' in format field specifier"));
        }
    }
    Ok(value)
}

fn positional_field(vm: &mut Vm, positional: &[Value], index: usize) -> VmResult<Value> {
    match positional.get(index) {
        Some(value) => Ok(value.clone()),
        None => Err(vm.index_error(format!(
            "Replacement index {} out of range for positional args tuple",
            index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn call(vm: &mut Vm, method: fn(&mut Vm, Args) -> VmResult<Value>, args: Vec<Value>) -> Value {
        method(vm, Args::new(args)).unwrap()
    }

    #[test]
    fn test_window_counts_characters() {
        assert_eq!(find_in("héllo", "l", None, None, false), 2);
        assert_eq!(find_in("héllo", "l", None, None, true), 3);
        assert_eq!(find_in("abc", "", Some(3), None, false), 3);
        assert_eq!(find_in("abc", "", Some(4), None, false), -1);
        assert_eq!(find_in("abcabc", "c", Some(-3), None, false), 5);
    }

    #[test]
    fn test_split_whitespace_limit() {
        assert_eq!(split_whitespace("  a b  c ", None), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b  c", Some(1)), vec!["a", "b  c"]);
        assert!(split_whitespace("   ", None).is_empty());
    }

    #[test]
    fn test_format_fields() {
        let mut vm = Vm::new(EngineConfig::default());
        let result = call(
            &mut vm,
            str_format,
            vec![Value::from("{} + {} = {:>4}"), Value::Int(1), Value::Int(2), Value::Int(3)],
        );
        assert_eq!(result.as_str(), Some("1 + 2 =    3"));
        let result = call(&mut vm, str_format, vec![Value::from("{0}{0}{{}}{1!r}"), Value::Int(7), Value::from("x")]);
        assert_eq!(result.as_str(), Some("77{}'x'"));
    }

    #[test]
    fn test_center_matches_reference_padding() {
        let mut vm = Vm::new(EngineConfig::default());
        let result = call(&mut vm, str_center, vec![Value::from("ab"), Value::Int(5), Value::from("*")]);
        assert_eq!(result.as_str(), Some("**ab*"));
        let result = call(&mut vm, str_center, vec![Value::from("abc"), Value::Int(6)]);
        assert_eq!(result.as_str(), Some(" abc  "));
    }

    #[test]
    fn test_zfill_keeps_sign() {
        let mut vm = Vm::new(EngineConfig::default());
        let result = call(&mut vm, str_zfill, vec![Value::from("-42"), Value::Int(5)]);
        assert_eq!(result.as_str(), Some("-0042"));
    }

    #[test]
    fn test_join_rejects_non_strings() {
        let mut vm = Vm::new(EngineConfig::default());
        let items = vm.new_list(vec![Value::from("a"), Value::Int(1)]);
        match str_join(&mut vm, Args::new(vec![Value::from(","), items])) {
            Err(crate::vm::VmError::Exception(exc)) => assert_eq!(
                vm.describe_exception(&exc),
                "TypeError: sequence item 1: expected str instance, int found"
            ),
            _ => panic!("expected TypeError"),
        }
    }
}
