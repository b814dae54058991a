use std::collections::HashMap;

use crate::docx::xml::{find_attr_any, local_name, XmlEvent, XmlPart};

pub const MAX_HEADING_LEVEL: u8 = 3;

/// One paragraph of the main body, in document order. `index` is the
/// coordinate the heading/requirement scan walks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParagraphRecord {
    pub index: usize,
    pub is_heading: bool,
    /// 1..=3 for headings, 0 otherwise.
    pub heading_level: u8,
    pub heading_text: String,
    pub full_text: String,
}

/// Where a comment's range opens, with its paragraph rendered twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorInfo {
    pub paragraph_index: usize,
    pub plain_text: String,
    pub marked_text: String,
}

#[derive(Clone, Debug, Default)]
pub struct BodyScan {
    pub paragraphs: Vec<ParagraphRecord>,
    pub anchors: HashMap<u32, AnchorInfo>,
}

impl BodyScan {
    pub fn anchor(&self, comment_id: u32) -> Option<&AnchorInfo> {
        self.anchors.get(&comment_id)
    }

    pub fn heading_count(&self) -> usize {
        self.paragraphs.iter().filter(|p| p.is_heading).count()
    }
}

#[derive(Default)]
struct ParaCapture {
    index: usize,
    depth: usize,
    text: String,
    p_style: Option<String>,
    outline_lvl: Option<i32>,
    in_ppr: bool,
    t_depth: usize,
    /// Comment ids whose range opens here, with the byte offset of the opening.
    starts: Vec<(u32, usize)>,
}

impl ParaCapture {
    fn finish(self, marker: &str, anchors: &mut HashMap<u32, AnchorInfo>) -> ParagraphRecord {
        let level = heading_level(self.p_style.as_deref(), self.outline_lvl);
        let plain = self.text.trim().to_string();
        for (id, offset) in &self.starts {
            if anchors.contains_key(id) {
                continue;
            }
            let mut marked = String::with_capacity(self.text.len() + marker.len());
            marked.push_str(&self.text[..*offset]);
            marked.push_str(marker);
            marked.push_str(&self.text[*offset..]);
            anchors.insert(
                *id,
                AnchorInfo {
                    paragraph_index: self.index,
                    plain_text: plain.clone(),
                    marked_text: marked.trim().to_string(),
                },
            );
        }
        ParagraphRecord {
            index: self.index,
            is_heading: level > 0,
            heading_level: level,
            heading_text: if level > 0 { plain.clone() } else { String::new() },
            full_text: self.text,
        }
    }
}

/// Heading level from a paragraph style (`Heading2`, `heading 2`) or an
/// explicit outline level. Only levels 1..=3 count; everything else is 0.
pub fn heading_level(p_style: Option<&str>, outline_lvl: Option<i32>) -> u8 {
    let level = outline_lvl
        .filter(|lvl| *lvl >= 0)
        .map(|lvl| lvl as usize + 1)
        .or_else(|| style_heading_level(p_style?));
    match level {
        Some(n) if (1..=MAX_HEADING_LEVEL as usize).contains(&n) => n as u8,
        _ => 0,
    }
}

fn style_heading_level(style: &str) -> Option<usize> {
    let lower = style.trim().to_ascii_lowercase();
    let rest = lower.strip_prefix("heading")?;
    let digits = rest.trim_start_matches([' ', '_', '-']);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<usize>().ok().filter(|n| *n > 0)
}

fn parse_comment_id(attrs: &[(String, String)]) -> Option<u32> {
    find_attr_any(attrs, &["w:id"], "id")?.trim().parse::<u32>().ok()
}

/// One pass over the main body: every paragraph (table cells and text boxes
/// included) gets an index in order of its opening tag, and every comment
/// range start resolves to the paragraph it opens in. Range starts sitting
/// between paragraphs attach to the start of the next one. Only the first
/// start marker seen for an id counts.
pub fn scan_body(part: &XmlPart, marker: &str) -> BodyScan {
    let mut scan = BodyScan::default();
    let mut stack: Vec<ParaCapture> = Vec::new();
    let mut pending: Vec<u32> = Vec::new();
    let mut depth = 0usize;
    let mut in_body = false;

    for ev in &part.events {
        match ev {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
                let empty = matches!(ev, XmlEvent::Empty { .. });
                let local = local_name(name);
                if !empty {
                    depth += 1;
                }
                if local == "body" {
                    in_body = !empty;
                    continue;
                }
                if !in_body {
                    continue;
                }
                match local {
                    "p" => {
                        let mut cap = ParaCapture {
                            index: scan.paragraphs.len() + stack.len(),
                            depth,
                            ..Default::default()
                        };
                        cap.starts.extend(pending.drain(..).map(|id| (id, 0)));
                        if empty {
                            let rec = cap.finish(marker, &mut scan.anchors);
                            insert_ordered(&mut scan.paragraphs, rec);
                        } else {
                            stack.push(cap);
                        }
                    }
                    "commentRangeStart" => {
                        if let Some(id) = parse_comment_id(attrs) {
                            match stack.last_mut() {
                                Some(cap) => {
                                    let at = cap.text.len();
                                    cap.starts.push((id, at));
                                }
                                None => pending.push(id),
                            }
                        }
                    }
                    _ => {
                        if let Some(cap) = stack.last_mut() {
                            match local {
                                "pPr" if !empty && cap.depth + 1 == depth => cap.in_ppr = true,
                                "pStyle" if cap.in_ppr => {
                                    cap.p_style =
                                        find_attr_any(attrs, &["w:val"], "val").map(str::to_string);
                                }
                                "outlineLvl" if cap.in_ppr => {
                                    cap.outline_lvl = find_attr_any(attrs, &["w:val"], "val")
                                        .and_then(|v| v.trim().parse::<i32>().ok());
                                }
                                "t" if !empty => cap.t_depth += 1,
                                _ => {}
                            }
                        }
                    }
                }
            }
            XmlEvent::End { name } => {
                let local = local_name(name);
                if local == "body" {
                    in_body = false;
                }
                let closes_para =
                    local == "p" && stack.last().map(|c| c.depth == depth).unwrap_or(false);
                if closes_para {
                    if let Some(cap) = stack.pop() {
                        let rec = cap.finish(marker, &mut scan.anchors);
                        insert_ordered(&mut scan.paragraphs, rec);
                    }
                } else if let Some(cap) = stack.last_mut() {
                    match local {
                        "pPr" if cap.depth + 1 == depth => cap.in_ppr = false,
                        "t" => cap.t_depth = cap.t_depth.saturating_sub(1),
                        _ => {}
                    }
                }
                depth = depth.saturating_sub(1);
            }
            XmlEvent::Text { text } => {
                if let Some(cap) = stack.last_mut() {
                    if cap.t_depth > 0 {
                        cap.text.push_str(text);
                    }
                }
            }
        }
    }
    scan
}

/// Nested paragraphs close before their container; keep the sequence sorted
/// by the index handed out when each one opened.
fn insert_ordered(paragraphs: &mut Vec<ParagraphRecord>, rec: ParagraphRecord) {
    let pos = paragraphs.partition_point(|p| p.index < rec.index);
    paragraphs.insert(pos, rec);
}
