use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};

use crate::docx::xml::{find_attr_any, local_name, XmlEvent, XmlPart};

/// One authored annotation from the comments part. Replies are ordinary
/// records whose `parent_id` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: u32,
    pub text: String,
    pub author: Option<String>,
    pub timestamp: Option<String>,
    pub parent_id: Option<u32>,
    /// Opaque key joining this record to the extended-comments part.
    pub thread_key: Option<String>,
}

impl CommentRecord {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Default)]
struct ParaBuf {
    text: String,
    br_count: usize,
}

#[derive(Default)]
struct CommentCapture {
    attrs: Vec<(String, String)>,
    paragraphs: Vec<String>,
    para_stack: Vec<ParaBuf>,
    first_para_key: Option<String>,
    seen_para: bool,
    t_depth: usize,
}

impl CommentCapture {
    fn new(attrs: &[(String, String)]) -> Self {
        Self {
            attrs: attrs.to_vec(),
            ..Default::default()
        }
    }

    fn open(&mut self, name: &str, attrs: &[(String, String)], empty: bool) {
        match local_name(name) {
            "p" => {
                if !self.seen_para {
                    self.seen_para = true;
                    self.first_para_key =
                        find_attr_any(attrs, &["w14:paraId"], "paraId").map(str::to_string);
                }
                if empty {
                    return;
                }
                self.para_stack.push(ParaBuf::default());
            }
            "br" => {
                if let Some(p) = self.para_stack.last_mut() {
                    p.br_count += 1;
                }
            }
            "t" if !empty => self.t_depth += 1,
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        match local_name(name) {
            "p" => {
                if let Some(p) = self.para_stack.pop() {
                    // Breaks are counted, not placed: their position among runs is not kept.
                    let mut text = p.text;
                    text.extend(std::iter::repeat('\n').take(p.br_count));
                    if !text.is_empty() {
                        self.paragraphs.push(text);
                    }
                }
            }
            "t" => self.t_depth = self.t_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.t_depth == 0 {
            return;
        }
        if let Some(p) = self.para_stack.last_mut() {
            p.text.push_str(text);
        }
    }

    fn finish(self) -> Option<CommentRecord> {
        let attrs = &self.attrs;
        let id = find_attr_any(attrs, &["w:id", "w15:id"], "id")?
            .trim()
            .parse::<u32>()
            .ok()?;
        let parent_id = find_attr_any(attrs, &["w:parentId", "w15:parentId"], "parentId")
            .and_then(|v| v.trim().parse::<u32>().ok());
        let author = find_attr_any(attrs, &["w:author"], "author")
            .or_else(|| find_attr_any(attrs, &["w:initials"], "initials"))
            .map(str::to_string);
        let timestamp = find_attr_any(attrs, &["w:date"], "date").and_then(normalize_timestamp);
        let thread_key = self
            .first_para_key
            .clone()
            .or_else(|| find_attr_any(attrs, &["w15:paraId"], "paraId").map(str::to_string))
            .filter(|k| !k.is_empty());
        let text = self.paragraphs.join("\n").trim().to_string();
        Some(CommentRecord {
            id,
            text,
            author,
            timestamp,
            parent_id,
            thread_key,
        })
    }
}

/// Flat comment records in source order. Entries with a missing or
/// non-integer id are skipped, as are repeats of an id already seen.
pub fn extract_comments(part: &XmlPart) -> Vec<CommentRecord> {
    let mut out: Vec<CommentRecord> = Vec::new();
    let mut seen: HashSet<u32> = HashSet::new();
    let mut capture: Option<(CommentCapture, usize)> = None;
    let mut depth = 0usize;

    let mut emit = |cap: CommentCapture, out: &mut Vec<CommentRecord>| {
        if let Some(rec) = cap.finish() {
            if seen.insert(rec.id) {
                out.push(rec);
            }
        }
    };

    for ev in &part.events {
        match ev {
            XmlEvent::Start { name, attrs } => {
                depth += 1;
                match capture.as_mut() {
                    Some((cap, _)) => cap.open(name, attrs, false),
                    None if local_name(name) == "comment" => {
                        capture = Some((CommentCapture::new(attrs), depth));
                    }
                    None => {}
                }
            }
            XmlEvent::Empty { name, attrs } => match capture.as_mut() {
                Some((cap, _)) => cap.open(name, attrs, true),
                None if local_name(name) == "comment" => {
                    emit(CommentCapture::new(attrs), &mut out);
                }
                None => {}
            },
            XmlEvent::End { name } => {
                let closes_comment = matches!(capture, Some((_, d)) if d == depth);
                if closes_comment {
                    if let Some((cap, _)) = capture.take() {
                        emit(cap, &mut out);
                    }
                } else if let Some((cap, _)) = capture.as_mut() {
                    cap.close(name);
                }
                depth = depth.saturating_sub(1);
            }
            XmlEvent::Text { text } => {
                if let Some((cap, _)) = capture.as_mut() {
                    cap.text(text);
                }
            }
        }
    }
    out
}

/// ISO-8601 values are re-emitted in canonical form; anything else is kept
/// verbatim. Empty input yields `None`.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    Some(raw.to_string())
}
