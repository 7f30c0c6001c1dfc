//! Layout-hazard vocabulary shared by the markup and style-sheet scanners.
//!
//! Detection is line-oriented and heuristic: no CSS parsing happens here.
//! Each scanner decides which platform and severity a hazard maps to.

use regex::Regex;

regex!(ABSOLUTE_POSITION, r"(?i)position\s*:\s*absolute");
regex!(FIXED_POSITION, r"(?i)position\s*:\s*fixed");
regex!(
    SPACING_DECLARATION,
    r#"(?i)\b(?:margin|padding)(?:-[a-z]+)*\s*:\s*([^;"'}]*)"#
);
// A value starts the declaration or follows a separator, so `.5em` is not read as `5em`.
regex!(EM_VALUE, r"(?i)(?:^|[\s:,(])(\d*\.?\d+)(rem|em)\b");
regex!(VIEWPORT_UNIT, r"\d+(?:vw|vh|vmin|vmax)\b");
regex!(TRANSFORM_PROPERTY, r"(?i)([a-z-]*)transform\s*:");
regex!(BLOCK_COMMENT, r"(?s)/\*.*?\*/");
regex!(MARKUP_COMMENT, r"(?s)<!--.*?-->");

/// A layout hazard found on one line.
#[derive(Clone, Debug, PartialEq)]
pub enum Hazard {
    /// `position: absolute`.
    AbsolutePosition,
    /// `position: fixed`.
    FixedPosition,
    /// Margin or padding at or above the configured em/rem threshold.
    LargeMargin {
        /// Largest em/rem value in the declaration.
        value: f64,
        /// `em` or `rem`, as written.
        unit: String,
    },
    /// Viewport-relative length (`vw`, `vh`, `vmin`, `vmax`).
    ViewportUnits,
    /// The `transform` property (never `text-transform`).
    Transform,
}

/// Scan one line for hazards, in a fixed order.
pub fn line_hazards(line: &str, margin_threshold: f64) -> Vec<Hazard> {
    let mut hazards = Vec::new();
    if ABSOLUTE_POSITION.is_match(line) {
        hazards.push(Hazard::AbsolutePosition);
    }
    if FIXED_POSITION.is_match(line) {
        hazards.push(Hazard::FixedPosition);
    }
    if let Some((value, unit)) = largest_spacing(line) {
        if value >= margin_threshold {
            hazards.push(Hazard::LargeMargin { value, unit });
        }
    }
    if VIEWPORT_UNIT.is_match(line) {
        hazards.push(Hazard::ViewportUnits);
    }
    if has_transform(line) {
        hazards.push(Hazard::Transform);
    }
    hazards
}

/// Largest em/rem value across every margin/padding declaration on the line.
fn largest_spacing(line: &str) -> Option<(f64, String)> {
    let mut largest: Option<(f64, String)> = None;
    for decl in SPACING_DECLARATION.captures_iter(line) {
        let Some(values) = decl.get(1) else {
            continue;
        };
        for caps in EM_VALUE.captures_iter(values.as_str()) {
            let Ok(value) = caps[1].parse::<f64>() else {
                continue;
            };
            if largest.as_ref().is_none_or(|(max, _)| value > *max) {
                largest = Some((value, caps[2].to_ascii_lowercase()));
            }
        }
    }
    largest
}

/// `true` if a real `transform:` declaration appears (`text-transform` excluded).
pub fn has_transform(text: &str) -> bool {
    TRANSFORM_PROPERTY
        .captures_iter(text)
        .any(|caps| !caps[1].to_ascii_lowercase().ends_with("text-"))
}

/// `true` if the text mentions absolute positioning anywhere.
pub fn has_absolute_position(text: &str) -> bool {
    ABSOLUTE_POSITION.is_match(text)
}

/// Blank out `/* ... */` comments, keeping newlines so line numbers hold.
pub fn strip_block_comments(text: &str) -> String {
    blank_matches(&BLOCK_COMMENT, text)
}

/// Blank out `<!-- ... -->` comments, keeping newlines so line numbers hold.
pub fn strip_markup_comments(text: &str) -> String {
    blank_matches(&MARKUP_COMMENT, text)
}

fn blank_matches(pattern: &Regex, text: &str) -> String {
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            caps[0].chars().filter(|c| *c == '\n').collect::<String>()
        })
        .into_owned()
}
