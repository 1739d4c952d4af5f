// src/extract.rs
//! Plain text out of fetched documents: HTML pages, PDF and DOCX files.
//!
//! Every extractor emits one block (paragraph, heading, list item) per line;
//! directive detection downstream works line by line.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::fetch::types::Payload;

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());

/// Largest `word/document.xml` we are willing to inflate.
const MAX_DOCX_XML_BYTES: u64 = 16 * 1024 * 1024;

/// Readable text of a payload, by content type. `None` for binary formats we
/// cannot read and for documents that fail to parse.
pub fn document_text(payload: &Payload) -> Option<String> {
    if payload.is_pdf() {
        pdf_to_text(&payload.bytes)
    } else if payload.is_docx() {
        docx_to_text(&payload.bytes)
    } else if payload.is_html() {
        Some(html_to_text(&payload.text()))
    } else if payload.is_textual() {
        Some(payload.text())
    } else {
        None
    }
}

/// Main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".article-body",
    "#content",
];

/// Subtrees that never carry source content.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
    "button", "svg", "iframe", "select",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "table", "section", "article", "main", "blockquote", "pre", "dd", "dt", "figcaption",
];

/// A content container must hold at least this much text to be preferred over `<body>`.
const MIN_CONTENT_CHARS: usize = 200;

/// Extract readable text from a page: the main-content container when one
/// exists, else the body, minus navigation and page chrome. One block element
/// per line, so directive detection still works line by line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for sel in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(el) = document.select(&selector).next() {
            let text = block_text(el);
            if text.chars().count() >= MIN_CONTENT_CHARS {
                return text;
            }
        }
    }

    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next());
    block_text(body.unwrap_or_else(|| document.root_element()))
}

fn block_text(root: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_blocks(root, &mut raw);
    tidy_lines(&raw)
}

fn collect_blocks(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if NOISE_TAGS.contains(&name) {
        return;
    }
    let block = BLOCK_TAGS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            collect_blocks(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&text.replace(['\n', '\r'], " "));
        }
    }
    if block {
        out.push('\n');
    }
}

/// Text layer of a PDF document. `None` when the document cannot be parsed.
///
/// The parser panics on some malformed files, so it runs behind `catch_unwind`.
pub fn pdf_to_text(bytes: &[u8]) -> Option<String> {
    let parsed = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match parsed {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::debug!(target: "extract", error = ?e, "pdf extraction failed");
            None
        }
        Err(_) => {
            tracing::warn!(target: "extract", "pdf parser panicked; document skipped");
            None
        }
    }
}

/// Paragraph text of a Word document (`word/document.xml`).
pub fn docx_to_text(bytes: &[u8]) -> Option<String> {
    let xml = match docx_document_xml(bytes) {
        Ok(xml) => xml,
        Err(e) => {
            tracing::debug!(target: "extract", error = %e, "docx unpack failed");
            return None;
        }
    };

    let mut reader = Reader::from_str(&xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => out.push(' '),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => match t.unescape() {
                Ok(text) => out.push_str(&text),
                Err(e) => {
                    tracing::debug!(target: "extract", error = %e, "docx text run skipped");
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(target: "extract", error = %e, "docx xml parse failed");
                return None;
            }
        }
    }

    let text = tidy_lines(&out);
    (!text.is_empty()).then_some(text)
}

fn docx_document_xml(bytes: &[u8]) -> zip::result::ZipResult<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let file = archive.by_name("word/document.xml")?;
    let mut xml = String::new();
    file.take(MAX_DOCX_XML_BYTES).read_to_string(&mut xml)?;
    Ok(xml)
}

fn tidy_lines(raw: &str) -> String {
    raw.lines()
        .map(|l| RE_WS.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
