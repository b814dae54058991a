use std::io::{Read, Seek};

use anyhow::Context;
use sha2::{Digest, Sha256};

use crate::config::ExtractOptions;
use crate::docx::body::{scan_body, AnchorInfo, BodyScan};
use crate::docx::comments::extract_comments;
use crate::docx::locate::{locate_context, ResolvedContext};
use crate::docx::package::{
    ContainerError, DocxPackage, COMMENTS_EXTENDED_PART, COMMENTS_PART, DOCUMENT_PART,
};
use crate::docx::threads::{build_threads, thread_text, FallbackLinkage, Thread};
use crate::export::ThreadRow;
use crate::progress::ConsoleProgress;

/// A top-level thread with the anchor and section context of its root comment.
#[derive(Clone, Debug)]
pub struct ResolvedThread {
    pub thread: Thread,
    pub anchor: Option<AnchorInfo>,
    pub context: ResolvedContext,
}

impl ResolvedThread {
    pub fn row(&self, opts: &ExtractOptions) -> ThreadRow {
        let anchor_text = self
            .anchor
            .as_ref()
            .map(|a| {
                if opts.prefer_marked_text {
                    a.marked_text.clone()
                } else {
                    a.plain_text.clone()
                }
            })
            .unwrap_or_default();
        ThreadRow {
            heading: self.context.nearest_heading_text.clone().unwrap_or_default(),
            requirement_id: self.context.requirement_id.clone().unwrap_or_default(),
            anchor_text,
            thread_text: thread_text(&self.thread, &opts.unknown_author),
        }
    }
}

/// Everything one extraction run produced.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    pub threads: Vec<ResolvedThread>,
    pub comment_count: usize,
    pub paragraph_count: usize,
    pub heading_count: usize,
}

impl Extraction {
    pub fn rows(&self, opts: &ExtractOptions) -> Vec<ThreadRow> {
        self.threads.iter().map(|t| t.row(opts)).collect()
    }

    pub fn anchored_count(&self) -> usize {
        self.threads.iter().filter(|t| t.anchor.is_some()).count()
    }

    pub fn with_heading_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.context.nearest_heading_text.is_some())
            .count()
    }

    pub fn with_requirement_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.context.requirement_id.is_some())
            .count()
    }
}

pub struct CommentThreadPipeline<'a> {
    opts: &'a ExtractOptions,
    progress: &'a ConsoleProgress,
}

impl<'a> CommentThreadPipeline<'a> {
    pub fn new(opts: &'a ExtractOptions, progress: &'a ConsoleProgress) -> Self {
        Self { opts, progress }
    }

    /// Runs on an in-memory package and also returns the hex SHA-256 of the input.
    pub fn extract_bytes(&self, bytes: Vec<u8>) -> anyhow::Result<(Extraction, String)> {
        let digest = hex::encode(Sha256::digest(&bytes));
        let mut pkg = DocxPackage::from_bytes(bytes).context("open docx package")?;
        let extraction = self.extract(&mut pkg)?;
        Ok((extraction, digest))
    }

    pub fn extract<R: Read + Seek>(&self, pkg: &mut DocxPackage<R>) -> anyhow::Result<Extraction> {
        let comments_part = match pkg.open_part(COMMENTS_PART) {
            Ok(part) => part,
            Err(ContainerError::PartNotFound { .. }) => {
                self.progress.info("no comments part: 0 threads");
                return Ok(Extraction::default());
            }
            Err(e) => return Err(e).context("read comments"),
        };
        let records = extract_comments(&comments_part);
        drop(comments_part);
        let comment_count = records.len();
        self.progress.info(format!("comments: {comment_count}"));
        if records.is_empty() {
            return Ok(Extraction::default());
        }

        let (threads, fallback) = build_threads(records, pkg.open_part(COMMENTS_EXTENDED_PART));
        match fallback {
            FallbackLinkage::Absent => self.progress.info("no extended comments part"),
            FallbackLinkage::Skipped => self
                .progress
                .warn("extended comments part unreadable; using direct reply links only"),
            FallbackLinkage::Applied(n) => {
                self.progress.info(format!("extended comments: {n} reply link(s) added"))
            }
        }
        self.progress.info(format!("threads: {}", threads.len()));

        let body = pkg.open_part(DOCUMENT_PART).context("read document body")?;
        let scan = scan_body(&body, &self.opts.marker_token);
        drop(body);
        self.progress.info(format!(
            "paragraphs: {} (headings: {}), anchored comments: {}",
            scan.paragraphs.len(),
            scan.heading_count(),
            scan.anchors.len()
        ));

        let total = threads.len();
        let mut resolved = Vec::with_capacity(total);
        for (i, thread) in threads.into_iter().enumerate() {
            resolved.push(self.resolve(thread, &scan));
            self.progress.progress("resolve", i + 1, total);
        }

        Ok(Extraction {
            threads: resolved,
            comment_count,
            paragraph_count: scan.paragraphs.len(),
            heading_count: scan.heading_count(),
        })
    }

    fn resolve(&self, thread: Thread, scan: &BodyScan) -> ResolvedThread {
        let anchor = scan.anchor(thread.record.id).cloned();
        let context = anchor
            .as_ref()
            .map(|a| locate_context(&scan.paragraphs, a.paragraph_index, &self.opts.requirement))
            .unwrap_or_default();
        ResolvedThread {
            thread,
            anchor,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::testutil::{build_docx, comments_ext_xml, comments_xml, document_xml};

    fn run(parts: &[(&str, &str)]) -> anyhow::Result<Extraction> {
        let opts = ExtractOptions::default();
        let progress = ConsoleProgress::silent();
        let pipeline = CommentThreadPipeline::new(&opts, &progress);
        pipeline.extract_bytes(build_docx(parts)).map(|(e, _)| e)
    }

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    #[test]
    fn end_to_end_thread_with_heading_and_requirement() {
        let comments = comments_xml(
            r#"<w:comment w:id="5" w:author="A"><w:p><w:r><w:t>Please clarify scope.</w:t></w:r></w:p></w:comment><w:comment w:id="6" w:author="B" w:parentId="5"><w:p><w:r><w:t>Clarified.</w:t></w:r></w:p></w:comment>"#,
        );
        let body = document_xml(&format!(
            r#"{}<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>3.2 Access Control</w:t></w:r></w:p>{}<w:p><w:commentRangeStart w:id="5"/><w:r><w:t>Users shall authenticate.</w:t></w:r><w:commentRangeEnd w:id="5"/></w:p>"#,
            para("Preamble"),
            para("See DSS045 for detail.")
        ));
        let ex = run(&[(DOCUMENT_PART, &body), (COMMENTS_PART, &comments)]).expect("extract");

        assert_eq!(ex.comment_count, 2);
        assert_eq!(ex.threads.len(), 1);
        let t = &ex.threads[0];
        assert_eq!(t.thread.record.id, 5);
        assert_eq!(t.thread.replies.len(), 1);
        assert_eq!(t.thread.replies[0].record.id, 6);
        assert_eq!(t.anchor.as_ref().map(|a| a.paragraph_index), Some(3));
        assert_eq!(t.context.nearest_heading_text.as_deref(), Some("3.2 Access Control"));
        assert_eq!(t.context.requirement_id.as_deref(), Some("DSS045"));

        let rows = ex.rows(&ExtractOptions::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].heading, "3.2 Access Control");
        assert_eq!(rows[0].requirement_id, "DSS045");
        assert_eq!(rows[0].anchor_text, "[[COMMENT]]Users shall authenticate.");
        assert_eq!(rows[0].thread_text, "[1] A: Please clarify scope.\nB: Clarified.");
        assert_eq!(ex.with_heading_count(), 1);
        assert_eq!(ex.with_requirement_count(), 1);
    }

    #[test]
    fn comments_part_with_another_prefix_still_threads() {
        let comments = r#"<?xml version="1.0" encoding="UTF-8"?><ns0:comments xmlns:ns0="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><ns0:comment ns0:id="5" ns0:author="A"><ns0:p><ns0:r><ns0:t>Please clarify scope.</ns0:t></ns0:r></ns0:p></ns0:comment></ns0:comments>"#;
        let body = document_xml(
            r#"<w:p><w:commentRangeStart w:id="5"/><w:r><w:t>Users shall authenticate.</w:t></w:r><w:commentRangeEnd w:id="5"/></w:p>"#,
        );
        let ex = run(&[(DOCUMENT_PART, &body), (COMMENTS_PART, comments)]).expect("extract");
        assert_eq!(ex.comment_count, 1);
        assert_eq!(ex.threads.len(), 1);
        assert_eq!(ex.anchored_count(), 1);
        assert_eq!(
            ex.rows(&ExtractOptions::default())[0].thread_text,
            "[1] A: Please clarify scope."
        );
    }

    #[test]
    fn title_before_first_heading_is_not_a_section() {
        let comments = comments_xml(r#"<w:comment w:id="1" w:author="A"><w:p><w:r><w:t>c</w:t></w:r></w:p></w:comment>"#);
        let body = document_xml(
            r#"<w:p><w:pPr><w:pStyle w:val="Title"/></w:pPr><w:r><w:t>ITSM-S-1002 Datensicherheit</w:t></w:r></w:p><w:p><w:commentRangeStart w:id="1"/><w:r><w:t>Cover text.</w:t></w:r></w:p>"#,
        );
        let ex = run(&[(DOCUMENT_PART, &body), (COMMENTS_PART, &comments)]).expect("extract");
        assert_eq!(ex.heading_count, 0);
        assert_eq!(ex.threads[0].context.nearest_heading_text, None);
    }

    #[test]
    fn no_comments_part_is_empty_not_error() {
        let body = document_xml(&para("text"));
        let ex = run(&[(DOCUMENT_PART, &body)]).expect("extract");
        assert!(ex.threads.is_empty());
        assert_eq!(ex.comment_count, 0);
    }

    #[test]
    fn malformed_archive_or_comments_is_fatal() {
        let opts = ExtractOptions::default();
        let progress = ConsoleProgress::silent();
        let pipeline = CommentThreadPipeline::new(&opts, &progress);
        assert!(pipeline.extract_bytes(b"PK\x03\x04garbage".to_vec()).is_err());

        let body = document_xml(&para("text"));
        let err = run(&[(DOCUMENT_PART, &body), (COMMENTS_PART, "<w:comments>")])
            .err()
            .expect("malformed comments");
        let container = err.downcast_ref::<ContainerError>().expect("container error");
        assert!(matches!(container, ContainerError::MalformedContainer { .. }));
    }

    #[test]
    fn malformed_body_is_fatal() {
        let comments = comments_xml(r#"<w:comment w:id="1"><w:p><w:r><w:t>x</w:t></w:r></w:p></w:comment>"#);
        assert!(run(&[(DOCUMENT_PART, "<w:document><w:body>"), (COMMENTS_PART, &comments)]).is_err());
        assert!(run(&[(COMMENTS_PART, &comments)]).is_err());
    }

    #[test]
    fn unanchored_and_fallback_threads() {
        let comments = comments_xml(
            r#"<w:comment w:id="1"><w:p w14:paraId="AAA1"><w:r><w:t>root</w:t></w:r></w:p></w:comment><w:comment w:id="2" w:author="R"><w:p w14:paraId="BBB2"><w:r><w:t>reply</w:t></w:r></w:p></w:comment>"#,
        );
        let ext = comments_ext_xml(r#"<w15:commentEx w15:paraId="AAA1"/><w15:commentEx w15:paraId="BBB2" w15:paraIdParent="AAA1"/>"#);
        let body = document_xml(&para("no ranges here"));
        let ex = run(&[
            (DOCUMENT_PART, &body),
            (COMMENTS_PART, &comments),
            (COMMENTS_EXTENDED_PART, &ext),
        ])
        .expect("extract");
        assert_eq!(ex.threads.len(), 1);
        assert!(ex.threads[0].anchor.is_none());
        assert_eq!(ex.threads[0].context, ResolvedContext::default());
        let row = ex.threads[0].row(&ExtractOptions::default());
        assert_eq!(row.heading, "");
        assert_eq!(row.anchor_text, "");
        assert_eq!(row.thread_text, "[1] Unknown: root\nR: reply");
    }

    #[test]
    fn plain_anchor_text_when_configured() {
        let comments = comments_xml(r#"<w:comment w:id="0" w:author="A"><w:p><w:r><w:t>c</w:t></w:r></w:p></w:comment>"#);
        let body = document_xml(r#"<w:p><w:r><w:t xml:space="preserve">Lead </w:t></w:r><w:commentRangeStart w:id="0"/><w:r><w:t>target</w:t></w:r></w:p>"#);
        let ex = run(&[(DOCUMENT_PART, &body), (COMMENTS_PART, &comments)]).expect("extract");
        let opts = ExtractOptions {
            prefer_marked_text: false,
            ..ExtractOptions::default()
        };
        assert_eq!(ex.rows(&opts)[0].anchor_text, "Lead target");
        let marked = &ex.threads[0].anchor.as_ref().expect("anchor").marked_text;
        assert_eq!(marked, "Lead [[COMMENT]]target");
        assert_eq!(marked.replacen("[[COMMENT]]", "", 1).trim(), "Lead target");
    }
}
