//! Placeholder expansion for command template words.

use crate::error::AppError;
use std::path::Path;

/// A single derivation from an item string, keyed by its placeholder
/// letter. Returns `None` when the derivation is out of range for this
/// item (e.g. `ARG` index past the last whitespace field); `expand` turns
/// that into an empty-string substitution rather than an error.
type Derive = fn(&str) -> Option<String>;

/// One of the four disjoint placeholder maps: `NULL`, `PATH`, `ARG`, `MACH`.
#[derive(Clone, Copy)]
pub struct PlaceholderMap {
    entries: &'static [(char, Derive)],
}

impl PlaceholderMap {
    fn get(&self, key: char) -> Option<Derive> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, f)| *f)
    }
}

fn path_full(item: &str) -> Option<String> {
    Some(item.to_string())
}

fn path_base(item: &str) -> Option<String> {
    // Full path with the last extension stripped (directory untouched),
    // matching Python's `os.path.splitext(x)[0]`.
    match Path::new(item).extension() {
        Some(ext) => {
            let ext_len = ext.len() + 1; // +1 for the dot
            Some(item[..item.len() - ext_len].to_string())
        }
        None => Some(item.to_string()),
    }
}

fn path_dir(item: &str) -> Option<String> {
    let path = Path::new(item);
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Some(p.display().to_string()),
        _ => Some(String::new()),
    }
}

fn path_file(item: &str) -> Option<String> {
    Some(
        Path::new(item)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    )
}

fn path_name(item: &str) -> Option<String> {
    Some(
        Path::new(item)
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    )
}

fn path_ext(item: &str) -> Option<String> {
    Some(match Path::new(item).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    })
}

fn mach_name(item: &str) -> Option<String> {
    Some(item.to_string())
}

macro_rules! arg_field {
    ($name:ident, $idx:expr) => {
        fn $name(item: &str) -> Option<String> {
            item.split_whitespace().nth($idx).map(str::to_string)
        }
    };
}
arg_field!(arg0, 0);
arg_field!(arg1, 1);
arg_field!(arg2, 2);
arg_field!(arg3, 3);
arg_field!(arg4, 4);
arg_field!(arg5, 5);
arg_field!(arg6, 6);
arg_field!(arg7, 7);

/// Empty map used for the singleton-empty-item case; only a literal `%%`
/// is meaningful.
pub const NULL_MAP: PlaceholderMap = PlaceholderMap { entries: &[] };

/// `-m` machine list: `%M` is the item verbatim.
pub const MACH_MAP: PlaceholderMap = PlaceholderMap {
    entries: &[('M', mach_name as Derive)],
};

/// `-a`/positional path list: `%P %B %D %F %N %E`.
pub const PATH_MAP: PlaceholderMap = PlaceholderMap {
    entries: &[
        ('P', path_full as Derive),
        ('B', path_base as Derive),
        ('D', path_dir as Derive),
        ('F', path_file as Derive),
        ('N', path_name as Derive),
        ('E', path_ext as Derive),
    ],
};

/// `-f` argument-file lines: `%0`..`%7` select whitespace-split fields.
pub const ARG_MAP: PlaceholderMap = PlaceholderMap {
    entries: &[
        ('0', arg0 as Derive),
        ('1', arg1 as Derive),
        ('2', arg2 as Derive),
        ('3', arg3 as Derive),
        ('4', arg4 as Derive),
        ('5', arg5 as Derive),
        ('6', arg6 as Derive),
        ('7', arg7 as Derive),
    ],
};

/// Expand every `%`-placeholder in `template` against `item` using `map`.
///
/// `%%` emits one literal `%` and halts further interpolation: the rest of
/// `template` is appended verbatim from that point on. This is a
/// deliberate, testable quirk of the original program and is preserved
/// rather than fixed.
pub fn expand(template: &str, item: &str, map: &PlaceholderMap) -> Result<String, AppError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            None => {
                // Trailing lone '%': emitted verbatim.
                out.push('%');
            }
            Some((_, '%')) => {
                out.push('%');
                // Halt: append the untouched remainder and stop scanning.
                if let Some((next_idx, _)) = chars.peek() {
                    out.push_str(&template[*next_idx..]);
                }
                return Ok(out);
            }
            Some((_, key)) => match map.get(key) {
                Some(derive) => {
                    if let Some(value) = derive(item) {
                        out.push_str(&value);
                    }
                    // Out-of-range derivation: expands to empty, not an error.
                }
                None => return Err(AppError::UnknownInterpolation(key)),
            },
        }
    }
    Ok(out)
}
