//! SRT font size normalization.
//!
//! Styled SRT files often carry `<font size="N">` tags tuned for one
//! renderer. The most common size is taken as the body text size and every
//! size is scaled so that it becomes the configured target.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn size_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"size="(\d+)""#).ok())
        .as_ref()
}

/// Occurrences of each `size="N"` value.
pub fn font_size_histogram(text: &str) -> BTreeMap<u32, usize> {
    let mut sizes = BTreeMap::new();
    let Some(pattern) = size_pattern() else {
        return sizes;
    };
    for caps in pattern.captures_iter(text) {
        if let Ok(size) = caps[1].parse::<u32>() {
            *sizes.entry(size).or_insert(0) += 1;
        }
    }
    sizes
}

/// Most frequent size; the smaller size wins a tie.
pub fn most_used_size(sizes: &BTreeMap<u32, usize>) -> Option<u32> {
    let mut best: Option<(u32, usize)> = None;
    for (&size, &count) in sizes {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((size, count));
        }
    }
    best.map(|(size, _)| size)
}

/// Rescale every size so the most used one becomes `target`.
///
/// Returns `None` when there is nothing to change.
pub fn normalize_font_sizes(text: &str, target: u32) -> Option<String> {
    let pattern = size_pattern()?;
    let sizes = font_size_histogram(text);
    let most_used = most_used_size(&sizes).filter(|s| *s > 0)?;
    if most_used == target {
        return None;
    }
    let scale = f64::from(target) / f64::from(most_used);
    debug!(most_used, target, scale, "rescaling subtitle font sizes");

    let rewritten = pattern.replace_all(text, |caps: &Captures| match caps[1].parse::<u32>() {
        Ok(size) => format!("size=\"{}\"", (f64::from(size) * scale).round() as u32),
        Err(_) => caps[0].to_string(),
    });
    Some(rewritten.into_owned())
}

/// Normalize the sizes in `path`. With `in_place` the file is rewritten,
/// otherwise the result is printed. Returns whether anything changed.
pub fn fix_subtitle_file(path: &Path, target: u32, in_place: bool) -> std::io::Result<bool> {
    let text = std::fs::read_to_string(path)?;
    let Some(fixed) = normalize_font_sizes(&text, target) else {
        return Ok(false);
    };
    if in_place {
        std::fs::write(path, fixed)?;
    } else {
        print!("{}", fixed);
    }
    Ok(true)
}
