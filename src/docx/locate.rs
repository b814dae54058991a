use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::docx::body::{ParagraphRecord, MAX_HEADING_LEVEL};

pub const DEFAULT_REQUIREMENT_PREFIX: &str = "DSS";
pub const DEFAULT_REQUIREMENT_MAX_DIGITS: usize = 3;

/// Section heading and requirement id found above a comment's anchor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedContext {
    pub nearest_heading_text: Option<String>,
    pub requirement_id: Option<String>,
}

/// Case-insensitive `<prefix><1..N ASCII digits>`, not followed by another ASCII digit.
#[derive(Clone, Debug)]
pub struct RequirementPattern {
    re: Regex,
}

impl RequirementPattern {
    pub fn new(prefix: &str, max_digits: usize) -> anyhow::Result<Self> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("requirement prefix must not be empty"));
        }
        if max_digits == 0 {
            return Err(anyhow!("requirement_max_digits must be at least 1"));
        }
        let pattern = format!(
            r"(?i)\b({}[0-9]{{1,{max_digits}}})(?:[^0-9]|$)",
            regex::escape(prefix)
        );
        let re = Regex::new(&pattern).with_context(|| format!("compile requirement regex: {pattern}"))?;
        Ok(Self { re })
    }

    /// First match in `text`, uppercased.
    pub fn find(&self, text: &str) -> Option<String> {
        self.re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())
    }
}

static DEFAULT_PATTERN: Lazy<RequirementPattern> = Lazy::new(|| {
    RequirementPattern::new(DEFAULT_REQUIREMENT_PREFIX, DEFAULT_REQUIREMENT_MAX_DIGITS)
        .expect("requirement regex")
});

impl Default for RequirementPattern {
    fn default() -> Self {
        DEFAULT_PATTERN.clone()
    }
}

/// Paragraphs from `from` down to index 0, paired with their distance from `from`.
pub struct BackwardWindow<'a> {
    paragraphs: &'a [ParagraphRecord],
    from: usize,
    next: Option<usize>,
}

impl<'a> BackwardWindow<'a> {
    pub fn new(paragraphs: &'a [ParagraphRecord], from: usize) -> Self {
        let start = if paragraphs.is_empty() {
            None
        } else {
            Some(from.min(paragraphs.len() - 1))
        };
        Self {
            paragraphs,
            from,
            next: start,
        }
    }
}

impl<'a> Iterator for BackwardWindow<'a> {
    type Item = (usize, &'a ParagraphRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next?;
        self.next = pos.checked_sub(1);
        let p = &self.paragraphs[pos];
        Some((self.from.saturating_sub(p.index), p))
    }
}

#[derive(Debug, Default)]
pub(crate) struct HeadingSlot {
    best: Option<(usize, u8, String)>,
}

impl HeadingSlot {
    /// Closer wins; at equal distance the structurally higher (lower number) level wins.
    pub(crate) fn offer(&mut self, distance: usize, level: u8, text: &str) {
        if !(1..=MAX_HEADING_LEVEL).contains(&level) {
            return;
        }
        let replace = match &self.best {
            None => true,
            Some((d, l, _)) => distance < *d || (distance == *d && level < *l),
        };
        if replace {
            self.best = Some((distance, level, text.to_string()));
        }
    }

    fn settled_before(&self, distance: usize) -> bool {
        matches!(&self.best, Some((d, _, _)) if *d < distance)
    }

    pub(crate) fn into_text(self) -> Option<String> {
        self.best.map(|(_, _, text)| text)
    }
}

#[derive(Debug, Default)]
struct RequirementSlot {
    found: Option<String>,
}

impl RequirementSlot {
    fn offer(&mut self, pattern: &RequirementPattern, text: &str) {
        if self.found.is_none() {
            self.found = pattern.find(text);
        }
    }
}

/// Single backward scan from `paragraph_index` to 0: nearest heading and the
/// requirement id textually closest above (or in) the anchored paragraph.
pub fn locate_context(
    paragraphs: &[ParagraphRecord],
    paragraph_index: usize,
    pattern: &RequirementPattern,
) -> ResolvedContext {
    let mut heading = HeadingSlot::default();
    let mut requirement = RequirementSlot::default();

    for (distance, p) in BackwardWindow::new(paragraphs, paragraph_index) {
        if requirement.found.is_some() && heading.settled_before(distance) {
            break;
        }
        if p.is_heading {
            heading.offer(distance, p.heading_level, &p.heading_text);
        }
        requirement.offer(pattern, &p.full_text);
    }

    ResolvedContext {
        nearest_heading_text: heading.into_text(),
        requirement_id: requirement.found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(index: usize, level: u8, text: &str) -> ParagraphRecord {
        ParagraphRecord {
            index,
            is_heading: level > 0,
            heading_level: level,
            heading_text: if level > 0 { text.to_string() } else { String::new() },
            full_text: text.to_string(),
        }
    }

    #[test]
    fn requirement_ids_are_case_insensitive_and_bounded() {
        let pat = RequirementPattern::default();
        assert_eq!(pat.find("see dss7 here").as_deref(), Some("DSS7"));
        assert_eq!(pat.find("DSS123").as_deref(), Some("DSS123"));
        assert_eq!(pat.find("DSS1234"), None);
        assert_eq!(pat.find("DSS"), None);
        assert_eq!(pat.find("(DSS045)").as_deref(), Some("DSS045"));
    }

    #[test]
    fn only_ascii_digits_form_an_id() {
        let pat = RequirementPattern::default();
        assert_eq!(pat.find("DSS\u{661}\u{662}"), None);
        assert_eq!(pat.find("DSS\u{FF11}"), None);
        assert_eq!(pat.find("DSS\u{661} then DSS04").as_deref(), Some("DSS04"));
    }

    #[test]
    fn custom_prefix() {
        let pat = RequirementPattern::new("REQ-", 4).expect("pattern");
        assert_eq!(pat.find("per req-1234.").as_deref(), Some("REQ-1234"));
        assert!(RequirementPattern::new("  ", 3).is_err());
        assert!(RequirementPattern::new("DSS", 0).is_err());
    }

    #[test]
    fn equal_distance_prefers_higher_level() {
        let mut slot = HeadingSlot::default();
        slot.offer(3, 2, "Sub");
        slot.offer(3, 1, "Top");
        assert_eq!(slot.into_text().as_deref(), Some("Top"));

        let mut slot = HeadingSlot::default();
        slot.offer(3, 1, "Top");
        slot.offer(3, 2, "Sub");
        slot.offer(4, 1, "Further");
        assert_eq!(slot.into_text().as_deref(), Some("Top"));
    }

    #[test]
    fn nearest_heading_and_requirement() {
        let paras = vec![
            p(0, 1, "3 Security"),
            p(1, 0, "Governed by DSS001."),
            p(2, 2, "3.2 Access Control"),
            p(3, 0, "See DSS045 for detail."),
            p(4, 0, "The anchored text."),
        ];
        let ctx = locate_context(&paras, 4, &RequirementPattern::default());
        assert_eq!(ctx.nearest_heading_text.as_deref(), Some("3.2 Access Control"));
        assert_eq!(ctx.requirement_id.as_deref(), Some("DSS045"));
    }

    #[test]
    fn requirement_may_sit_above_the_heading() {
        let paras = vec![
            p(0, 0, "Scope of dss12"),
            p(1, 3, "Detail"),
            p(2, 0, "anchor"),
        ];
        let ctx = locate_context(&paras, 2, &RequirementPattern::default());
        assert_eq!(ctx.nearest_heading_text.as_deref(), Some("Detail"));
        assert_eq!(ctx.requirement_id.as_deref(), Some("DSS12"));
    }

    #[test]
    fn anchor_paragraph_itself_is_scanned() {
        let paras = vec![p(0, 0, "nothing"), p(1, 1, "DSS9 Heading")];
        let ctx = locate_context(&paras, 1, &RequirementPattern::default());
        assert_eq!(ctx.nearest_heading_text.as_deref(), Some("DSS9 Heading"));
        assert_eq!(ctx.requirement_id.as_deref(), Some("DSS9"));
    }

    #[test]
    fn nothing_found() {
        let paras = vec![p(0, 0, "plain"), p(1, 0, "text")];
        let ctx = locate_context(&paras, 1, &RequirementPattern::default());
        assert_eq!(ctx, ResolvedContext::default());
        assert_eq!(locate_context(&[], 0, &RequirementPattern::default()), ResolvedContext::default());
    }

    #[test]
    fn window_walks_down_to_zero() {
        let paras = vec![p(0, 0, "a"), p(1, 0, "b"), p(2, 0, "c")];
        let got: Vec<(usize, usize)> = BackwardWindow::new(&paras, 2)
            .map(|(d, p)| (d, p.index))
            .collect();
        assert_eq!(got, vec![(0, 2), (1, 1), (2, 0)]);
    }
}
