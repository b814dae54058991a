use std::fmt::Write;

use crate::docx::comments::CommentRecord;
use crate::docx::threads::Thread;
use crate::pipeline::ResolvedThread;

const RULE_WIDTH: usize = 80;

fn push_body(out: &mut String, indent: &str, text: &str) {
    let body = if text.is_empty() { "(no text)" } else { text };
    for line in body.lines() {
        let _ = writeln!(out, "{indent}{line}");
    }
}

fn label(rec: &CommentRecord) -> &'static str {
    if rec.is_reply() {
        "Reply"
    } else {
        "Comment"
    }
}

fn push_replies(out: &mut String, thread: &Thread, depth: usize, unknown_author: &str) {
    if thread.replies.is_empty() {
        return;
    }
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "\n{indent}Subconversation (level {depth}):");
    for (i, reply) in thread.replies.iter().enumerate() {
        let r = &reply.record;
        let _ = writeln!(out, "{indent}  [{}] {} ID {}", i + 1, label(r), r.id);
        let _ = writeln!(
            out,
            "{indent}      Author: {}",
            r.author.as_deref().unwrap_or(unknown_author)
        );
        let _ = writeln!(
            out,
            "{indent}      Date:   {}",
            r.timestamp.as_deref().unwrap_or("Unknown date")
        );
        let _ = writeln!(out, "{indent}      Text:");
        push_body(out, &format!("{indent}        "), &r.text);
        push_replies(out, reply, depth + 1, unknown_author);
    }
}

/// Human-readable dump of the first `limit` threads.
pub fn render_threads(threads: &[ResolvedThread], limit: usize, unknown_author: &str) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);
    let shown = threads.iter().take(limit).count();
    for (i, rt) in threads.iter().take(limit).enumerate() {
        let root = &rt.thread.record;
        let _ = writeln!(out, "{rule}");
        let header = format!("Thread #{} - Comment ID {}", i + 1, root.id);
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{}", "-".repeat(header.chars().count()));
        let _ = writeln!(out, "Author: {}", root.author.as_deref().unwrap_or(unknown_author));
        let _ = writeln!(
            out,
            "Date:   {}",
            root.timestamp.as_deref().unwrap_or("Unknown date")
        );
        if let Some(h) = rt.context.nearest_heading_text.as_deref() {
            let _ = writeln!(out, "Section: {h}");
        }
        if let Some(req) = rt.context.requirement_id.as_deref() {
            let _ = writeln!(out, "Requirement: {req}");
        }
        let _ = writeln!(out, "Comment:");
        push_body(&mut out, "", &root.text);
        push_replies(&mut out, &rt.thread, 1, unknown_author);
    }
    if shown == 0 {
        let _ = writeln!(out, "No comments found.");
    } else {
        let _ = writeln!(out, "{rule}");
    }
    out
}
