use anyhow::{bail, Result};
use std::collections::HashSet;

const MARKER_PREFIX: &str = "// @generated ";

/// A named region of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBlock {
    pub name: String,
    pub body: String,
}

impl GeneratedBlock {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn begin_marker(&self) -> String {
        format!("{}begin {}", MARKER_PREFIX, self.name)
    }

    pub fn end_marker(&self) -> String {
        format!("{}end {}", MARKER_PREFIX, self.name)
    }
}

enum Marker<'a> {
    Begin(&'a str),
    End(&'a str),
}

fn parse_marker(line: &str) -> Option<Marker<'_>> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;
    match rest.split_once(' ')? {
        ("begin", name) => Some(Marker::Begin(name.trim())),
        ("end", name) => Some(Marker::End(name.trim())),
        _ => None,
    }
}

/// Removes the body of every generated block, keeping the markers and all hand-written text.
pub fn strip_generated(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut open: Option<&str> = None;

    for line in text.lines() {
        match (parse_marker(line), open) {
            (Some(Marker::Begin(name)), None) => {
                open = Some(name);
                push_line(&mut out, line);
            }
            (Some(Marker::End(name)), Some(current)) if name == current => {
                open = None;
                push_line(&mut out, line);
            }
            (_, Some(_)) => {}
            (_, None) => push_line(&mut out, line),
        }
    }

    if let Some(name) = open {
        bail!("Generated block '{}' has no end marker", name);
    }
    Ok(out)
}

/// Writes `blocks` into `existing`.
///
/// Previously generated bodies are stripped first. Each block is filled at its markers, or
/// appended when the text has none. Marker pairs of blocks no longer generated are dropped.
/// Splicing the same blocks twice yields the same text.
pub fn splice(existing: &str, blocks: &[GeneratedBlock]) -> Result<String> {
    let stripped = strip_generated(existing)?;
    let mut out = String::with_capacity(stripped.len());
    let mut filled: HashSet<&str> = HashSet::new();
    let mut dropping: Option<&str> = None;

    for line in stripped.lines() {
        if let Some(name) = dropping {
            if matches!(parse_marker(line), Some(Marker::End(end)) if end == name) {
                dropping = None;
            }
            continue;
        }

        match parse_marker(line) {
            Some(Marker::Begin(name)) => {
                match blocks.iter().find(|b| b.name == name) {
                    Some(block) if filled.insert(block.name.as_str()) => {
                        push_line(&mut out, line);
                        for body_line in block.body.lines() {
                            push_line(&mut out, body_line);
                        }
                    }
                    _ => dropping = Some(name),
                }
            }
            _ => push_line(&mut out, line),
        }
    }

    for block in blocks {
        if filled.contains(block.name.as_str()) {
            continue;
        }
        push_line(&mut out, &block.begin_marker());
        for body_line in block.body.lines() {
            push_line(&mut out, body_line);
        }
        push_line(&mut out, &block.end_marker());
    }

    Ok(out)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}
