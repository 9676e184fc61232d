//! Splits a rendered diff report into comment-sized fragments.
//!
//! A report looks like this:
//!
//! ````text
//! ## Argo CD Diff Preview          <- header: everything before the first <details>
//! ...
//! <details>                        <- one section per application
//! <summary>app (path)</summary>
//! <br>
//!
//! ```diff
//! ...
//! ```
//!
//! </details>
//!
//! _Stats_:                         <- footer: from the last _Stats_: line to the end
//! [Applications: 1]
//! ````
//!
//! Header and footer go into the first fragment only. When a cut falls inside a
//! section, the section is closed at the end of one fragment and reopened with a
//! "(continuation...)" summary at the start of the next, so each comment renders on
//! its own.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SplitError;

/// GitHub's limit on the length of an issue comment body.
pub const DEFAULT_MAX_COMMENT_LENGTH: usize = 65_536;

const SECTION_OPEN: &str = "<details>";
const SECTION_CLOSE: &str = "</details>";
const SUMMARY_OPEN: &str = "<summary>";
const SUMMARY_CLOSE: &str = "</summary>";
const TRAILER: &str = "_Stats_:";
const FENCE: &str = "```";

/// Smallest reserve kept for the part indicator, whatever the digit width.
const MIN_PART_INDICATOR_RESERVE: usize = 35;
/// Part numbers are first assumed to fit in this many digits.
const INITIAL_PART_DIGITS: usize = 3;
/// Below this per-fragment budget no meaningful content fits.
const MIN_CONTENT_BUDGET: i64 = 100;

/// One comment-sized piece of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    /// 1-based position of this fragment.
    pub part_number: usize,
    pub total_parts: usize,
    pub content: String,
    /// Byte length of `content`.
    pub size: usize,
}

impl Fragment {
    fn new(part_number: usize, total_parts: usize, content: String) -> Self {
        let size = content.len();
        Self {
            part_number,
            total_parts,
            content,
            size,
        }
    }
}

/// Renders the marker appended to every fragment of a multi-part document.
pub fn part_indicator(part_number: usize, total_parts: usize) -> String {
    format!("\n\n---\n**Part {part_number} of {total_parts}**\n")
}

/// Bytes reserved for the part indicator when part numbers have `digits` digits.
fn part_indicator_reserve(digits: usize) -> usize {
    let widest = "9".repeat(digits);
    let rendered = format!("\n\n---\n**Part {widest} of {widest}**\n").len();
    rendered.max(MIN_PART_INDICATOR_RESERVE)
}

fn digit_count(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Splits `document` into fragments of at most `max_bytes` bytes each (best effort).
///
/// Documents that already fit come back unchanged as a single fragment. Larger
/// documents must contain at least one `<details>` section.
///
/// ```
/// use diff_preview_comment_core::split;
///
/// let fragments = split("## Argo CD Diff Preview\n\nNo changes.\n", 65_536).unwrap();
/// assert_eq!(fragments.len(), 1);
/// assert_eq!(fragments[0].total_parts, 1);
/// ```
pub fn split(document: &str, max_bytes: usize) -> Result<Vec<Fragment>, SplitError> {
    if document.len() <= max_bytes {
        info!(
            size = document.len(),
            max_bytes, "Document is within the limit, no splitting needed"
        );
        return Ok(vec![Fragment::new(1, 1, document.to_string())]);
    }

    info!(
        size = document.len(),
        max_bytes, "Document exceeds the limit, splitting"
    );

    let layout = Layout::parse(document)?;
    let mut digits = INITIAL_PART_DIGITS;
    loop {
        let budget = layout.content_budget(max_bytes, part_indicator_reserve(digits))?;
        let chunks = chunk_body(layout.body(), budget);
        let needed = digit_count(chunks.len());
        if needed <= digits {
            return Ok(layout.assemble(chunks));
        }
        debug!(
            parts = chunks.len(),
            digits = needed,
            "Part count outgrew the indicator reserve, splitting again"
        );
        digits = needed;
    }
}

/// Header, body and footer of a document that needs splitting.
struct Layout<'a> {
    lines: Vec<&'a str>,
    header: String,
    footer: String,
    body_start: usize,
    body_end: usize,
}

impl<'a> Layout<'a> {
    fn parse(document: &'a str) -> Result<Self, SplitError> {
        let lines: Vec<&str> = document.split('\n').collect();

        let body_start = lines
            .iter()
            .position(|line| line.contains(SECTION_OPEN))
            .ok_or(SplitError::NoSections)?;

        let header = if body_start == 0 {
            String::new()
        } else {
            let mut header = lines[..body_start].join("\n");
            header.push('\n');
            header
        };

        let footer_start = lines
            .iter()
            .rposition(|line| line.contains(TRAILER))
            .filter(|&idx| idx > body_start);

        let (footer, body_end) = match footer_start {
            Some(idx) => (format!("\n{}", lines[idx..].join("\n")), idx),
            None => (String::new(), lines.len()),
        };

        debug!(
            header_bytes = header.len(),
            footer_bytes = footer.len(),
            body_lines = body_end - body_start,
            "Parsed document layout"
        );

        Ok(Self {
            lines,
            header,
            footer,
            body_start,
            body_end,
        })
    }

    fn body(&self) -> &[&'a str] {
        &self.lines[self.body_start..self.body_end]
    }

    /// The same conservative budget is used for every fragment, including the ones
    /// that carry neither header nor footer.
    fn content_budget(&self, max_bytes: usize, reserve: usize) -> Result<usize, SplitError> {
        let available =
            max_bytes as i64 - self.header.len() as i64 - self.footer.len() as i64 - reserve as i64;
        if available < MIN_CONTENT_BUDGET {
            return Err(SplitError::BudgetTooSmall { available });
        }
        Ok(available as usize)
    }

    fn assemble(&self, chunks: Vec<String>) -> Vec<Fragment> {
        let total_parts = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let part_number = idx + 1;
                let mut content = String::new();
                if idx == 0 {
                    content.push_str(&self.header);
                    content.push_str(&chunk);
                    content.push_str(&self.footer);
                } else {
                    content.push_str(&chunk);
                }
                if total_parts > 1 {
                    content.push_str(&part_indicator(part_number, total_parts));
                }
                Fragment::new(part_number, total_parts, content)
            })
            .collect()
    }
}

/// The section the walk is currently inside.
#[derive(Debug, Clone, Default)]
struct OpenSection {
    title: String,
    /// Opening line of a code fence that has not been closed yet, e.g. "```diff".
    fence: Option<String>,
}

impl OpenSection {
    fn closing_tags(&self) -> &'static str {
        if self.fence.is_some() {
            "\n```\n\n</details>\n"
        } else {
            "\n\n</details>\n"
        }
    }

    fn continuation_header(&self) -> String {
        let summary = if self.title.is_empty() {
            "(continuation...)".to_string()
        } else {
            format!("{} (continuation...)", self.title)
        };
        let mut header = format!("{SECTION_OPEN}\n{SUMMARY_OPEN}{summary}{SUMMARY_CLOSE}\n<br>\n");
        if let Some(fence) = &self.fence {
            header.push('\n');
            header.push_str(fence);
        }
        header
    }

    /// Section state after `line` has been appended. `next` is the line that follows,
    /// where the summary usually lives.
    fn advance(state: Option<OpenSection>, line: &str, next: Option<&str>) -> Option<OpenSection> {
        if line.contains(SECTION_CLOSE) {
            return None;
        }
        if line.contains(SECTION_OPEN) {
            let title = summary_title(line)
                .or_else(|| next.and_then(summary_title))
                .unwrap_or_default();
            return Some(OpenSection { title, fence: None });
        }
        state.map(|mut section| {
            if line.trim_start().starts_with(FENCE) {
                section.fence = match section.fence {
                    Some(_) => None,
                    None => Some(line.trim().to_string()),
                };
            }
            section
        })
    }
}

/// Extracts the trimmed text between `<summary>` and `</summary>`.
fn summary_title(line: &str) -> Option<String> {
    let start = line.find(SUMMARY_OPEN)? + SUMMARY_OPEN.len();
    let end = line[start..].find(SUMMARY_CLOSE)? + start;
    Some(line[start..end].trim().to_string())
}

/// Groups body lines into chunks whose size stays within `budget` bytes, closing and
/// reopening sections at every cut.
fn chunk_body(body: &[&str], budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size = 0usize;
    let mut section: Option<OpenSection> = None;

    for (idx, line) in body.iter().enumerate() {
        let next_section = OpenSection::advance(section.clone(), line, body.get(idx + 1).copied());

        let line_size = line.len() + 1;
        let closing_size = next_section
            .as_ref()
            .map(|s| s.closing_tags().len())
            .unwrap_or(0);

        if current_size + line_size + closing_size > budget && !current.is_empty() {
            let mut sealed = current.join("\n");
            if let Some(open) = &section {
                sealed.push_str(open.closing_tags());
            }
            debug!(chunk = chunks.len(), size = sealed.len(), "Created chunk");
            chunks.push(sealed);

            current = Vec::new();
            current_size = 0;
            if let Some(open) = &section {
                let header = open.continuation_header();
                current_size = header.len() + 1;
                current.push(header);
            }
        }

        current.push((*line).to_string());
        current_size += line_size;
        section = next_section;
    }

    if !current.is_empty() {
        let sealed = current.join("\n");
        debug!(chunk = chunks.len(), size = sealed.len(), "Created final chunk");
        chunks.push(sealed);
    }

    chunks
}
