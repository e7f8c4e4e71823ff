//! Template Markup Parser
//!
//! Tokenizer + single-pass recursive-descent parser for the report markup
//! mini-language:
//!
//! - `{{identifier}}` variable token
//! - `{{#if name}} ... {{else}} ... {{/if}}` conditional block
//! - `{{#each name}} ... {{/each}}` loop block
//!
//! The parser never fails: unbalanced or malformed tags degrade to literal
//! text nodes and flow through to the sanitization pass. Blocks nest
//! structurally; how many are honored is an evaluator concern.

/// One node of the parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Variable(String),
    If {
        name: String,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
    Each {
        name: String,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag<'a> {
    Var(&'a str),
    OpenIf(&'a str),
    Else,
    CloseIf,
    OpenEach(&'a str),
    CloseEach,
}

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Text(&'a str),
    // Raw span kept so a dangling tag can fall back to literal text.
    Tag { raw: &'a str, tag: Tag<'a> },
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify(body: &str) -> Option<Tag<'_>> {
    let body = body.trim();
    if let Some(rest) = body.strip_prefix("#if ") {
        let name = rest.trim();
        return is_identifier(name).then_some(Tag::OpenIf(name));
    }
    if let Some(rest) = body.strip_prefix("#each ") {
        let name = rest.trim();
        return is_identifier(name).then_some(Tag::OpenEach(name));
    }
    match body {
        "else" => Some(Tag::Else),
        "/if" => Some(Tag::CloseIf),
        "/each" => Some(Tag::CloseEach),
        _ => is_identifier(body).then_some(Tag::Var(body)),
    }
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            tokens.push(Token::Text(&rest[..open]));
        }
        let after_open = &rest[open..];
        match after_open[2..].find("}}") {
            Some(close) => {
                let raw = &after_open[..close + 4];
                let body = &after_open[2..close + 2];
                match classify(body) {
                    Some(tag) => tokens.push(Token::Tag { raw, tag }),
                    // Not part of the language; carried as text so the
                    // sanitizer can strip it at the end.
                    None => tokens.push(Token::Text(raw)),
                }
                rest = &after_open[close + 4..];
            }
            None => {
                // Unterminated "{{" runs to end of input as literal text.
                tokens.push(Token::Text(after_open));
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

/// Parse template source into an AST. Total: every input, including
/// malformed markup, produces a node list.
pub fn parse(source: &str) -> Vec<Node> {
    let tokens = tokenize(source);
    let (nodes, pos, _) = parse_nodes(&tokens, 0, &[]);
    debug_assert_eq!(pos, tokens.len());
    nodes
}

/// Parse until one of `until` is seen at this nesting level, or input ends.
/// Returns the nodes, the position just past the terminator, and which
/// terminator was consumed (`None` at end of input).
fn parse_nodes<'a>(
    tokens: &[Token<'a>],
    mut pos: usize,
    until: &[Tag<'a>],
) -> (Vec<Node>, usize, Option<Tag<'a>>) {
    let mut nodes = Vec::new();

    while pos < tokens.len() {
        match tokens[pos] {
            Token::Text(text) => {
                push_text(&mut nodes, text);
                pos += 1;
            }
            Token::Tag { raw, tag } => {
                if until.contains(&tag) {
                    return (nodes, pos + 1, Some(tag));
                }
                match tag {
                    Tag::Var(name) => {
                        nodes.push(Node::Variable(name.to_string()));
                        pos += 1;
                    }
                    Tag::OpenIf(name) => {
                        pos = parse_if(tokens, pos + 1, raw, name, &mut nodes);
                    }
                    Tag::OpenEach(name) => {
                        pos = parse_each(tokens, pos + 1, raw, name, &mut nodes);
                    }
                    // Stray closer/else at this level: authoring error,
                    // kept as literal text.
                    Tag::Else | Tag::CloseIf | Tag::CloseEach => {
                        push_text(&mut nodes, raw);
                        pos += 1;
                    }
                }
            }
        }
    }
    (nodes, pos, None)
}

fn parse_if(
    tokens: &[Token<'_>],
    pos: usize,
    open_raw: &str,
    name: &str,
    nodes: &mut Vec<Node>,
) -> usize {
    let (then_branch, pos, closer) = parse_nodes(tokens, pos, &[Tag::Else, Tag::CloseIf]);

    match closer {
        Some(Tag::CloseIf) => {
            nodes.push(Node::If {
                name: name.to_string(),
                then_branch,
                else_branch: Vec::new(),
            });
            pos
        }
        Some(Tag::Else) => {
            let (else_branch, pos, closer) = parse_nodes(tokens, pos, &[Tag::CloseIf]);
            match closer {
                Some(_) => {
                    nodes.push(Node::If {
                        name: name.to_string(),
                        then_branch,
                        else_branch,
                    });
                    pos
                }
                // {{#if}}...{{else}}... with no {{/if}}: everything
                // degrades to literal text around the parsed interior.
                None => {
                    push_text(nodes, open_raw);
                    extend_nodes(nodes, then_branch);
                    push_text(nodes, "{{else}}");
                    extend_nodes(nodes, else_branch);
                    pos
                }
            }
        }
        // No {{/if}} anywhere: the open tag itself becomes text.
        _ => {
            push_text(nodes, open_raw);
            extend_nodes(nodes, then_branch);
            pos
        }
    }
}

fn parse_each(
    tokens: &[Token<'_>],
    pos: usize,
    open_raw: &str,
    name: &str,
    nodes: &mut Vec<Node>,
) -> usize {
    let (body, pos, closer) = parse_nodes(tokens, pos, &[Tag::CloseEach]);
    match closer {
        Some(_) => {
            nodes.push(Node::Each {
                name: name.to_string(),
                body,
            });
            pos
        }
        None => {
            push_text(nodes, open_raw);
            extend_nodes(nodes, body);
            pos
        }
    }
}

fn extend_nodes(nodes: &mut Vec<Node>, extra: Vec<Node>) {
    for node in extra {
        match node {
            Node::Text(text) => push_text(nodes, &text),
            other => nodes.push(other),
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    // Merge adjacent text so degraded tags read back as one span.
    if let Some(Node::Text(prev)) = nodes.last_mut() {
        prev.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Reconstruct markup for a node list. Used when a stage re-emits spans it
/// does not resolve, so later stages (and finally the sanitizer) see them.
pub fn write_nodes(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
            Node::If {
                name,
                then_branch,
                else_branch,
            } => {
                out.push_str("{{#if ");
                out.push_str(name);
                out.push_str("}}");
                write_nodes(then_branch, out);
                if !else_branch.is_empty() {
                    out.push_str("{{else}}");
                    write_nodes(else_branch, out);
                }
                out.push_str("{{/if}}");
            }
            Node::Each { name, body } => {
                out.push_str("{{#each ");
                out.push_str(name);
                out.push_str("}}");
                write_nodes(body, out);
                out.push_str("{{/each}}");
            }
        }
    }
}
