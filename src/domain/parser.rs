//! Fail-soft script parser.
//!
//! Consumes the token stream of one source file and yields a shallow
//! syntactic model: the declared object, its events and functions with body
//! token spans, embedded SQL statements lifted from those bodies, and
//! call-site candidates for the relation analyzer. Parse errors never abort
//! the file; the parser records the error, skips to the next statement
//! boundary, and continues until `max_errors` is reached.

use std::ops::Range;

use crate::domain::lexer::{self, Token, TokenKind};
use crate::domain::source_kind::SourceKind;

/// Where a script fragment lives inside its object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOwner {
    Event(String),
    Function(String),
    ObjectLevel,
}

#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub name: String,
    pub line: u32,
    pub body: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedFunction {
    pub name: String,
    pub signature: String,
    pub line: u32,
    pub body: Range<usize>,
}

/// One embedded SQL statement, reassembled verbatim.
#[derive(Debug, Clone)]
pub struct EmbeddedSql {
    pub owner: ScriptOwner,
    pub statement_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteKind {
    FunctionCall,
    ScreenOpen,
    EventTrigger,
    DataGridUse,
}

/// A callee reference discovered inside an event or function body. Function
/// calls are candidates; the analyzer resolves them against the global
/// function directory.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller: ScriptOwner,
    pub callee: String,
    pub kind: CallSiteKind,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

/// The shallow syntactic model of one source file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub name: String,
    pub kind: SourceKind,
    pub module: Option<String>,
    pub source_path: String,
    pub events: Vec<ParsedEvent>,
    pub functions: Vec<ParsedFunction>,
    pub embedded_sql: Vec<EmbeddedSql>,
    pub call_sites: Vec<CallSite>,
    pub errors: Vec<ParseError>,
    pub abandoned: bool,
}

/// Script parser with a per-file error budget.
pub struct Parser {
    max_errors: usize,
}

impl Parser {
    pub fn new(max_errors: usize) -> Self {
        Parser { max_errors }
    }

    pub fn parse(
        &self,
        name: &str,
        kind: SourceKind,
        module: Option<&str>,
        source_path: &str,
        text: &str,
    ) -> ParsedFile {
        let tokens = lexer::tokenize(text);
        let mut file = ParsedFile {
            name: name.to_lowercase(),
            kind: refine_kind(kind, &tokens),
            module: module.map(|m| m.to_string()),
            source_path: source_path.to_string(),
            events: Vec::new(),
            functions: Vec::new(),
            embedded_sql: Vec::new(),
            call_sites: Vec::new(),
            errors: Vec::new(),
            abandoned: false,
        };

        let mut idx = 0;
        while idx < tokens.len() && !file.abandoned {
            let token = &tokens[idx];
            match token.kind {
                TokenKind::Keyword if token.is_keyword("event") || token.is_keyword("on") => {
                    idx = self.parse_event(&tokens, idx, &mut file);
                }
                TokenKind::Keyword
                    if token.is_keyword("function") || token.is_keyword("subroutine") =>
                {
                    idx = self.parse_function(&tokens, idx, &mut file);
                }
                TokenKind::Keyword if token.is_keyword("end") => {
                    // stray end at top level
                    let next = next_significant(&tokens, idx + 1);
                    if let Some(next_idx) = next {
                        if tokens[next_idx].is_keyword("event")
                            || tokens[next_idx].is_keyword("function")
                            || tokens[next_idx].is_keyword("subroutine")
                        {
                            self.record_error(
                                &mut file,
                                token,
                                format!("unmatched end {}", tokens[next_idx].canonical()),
                            );
                            idx = skip_to_statement_boundary(&tokens, next_idx + 1);
                            continue;
                        }
                    }
                    idx += 1;
                }
                TokenKind::Eof => break,
                _ => idx += 1,
            }
        }

        if !file.abandoned {
            // object-level statements (instance declarations, cursor blocks)
            let object_span = 0..tokens.len();
            self.collect_sql(&tokens, &object_span, ScriptOwner::ObjectLevel, &mut file, true);
        }

        file
    }

    fn parse_event(&self, tokens: &[Token], start: usize, file: &mut ParsedFile) -> usize {
        let keyword = &tokens[start];
        let block_word = keyword.canonical();
        let name_idx = match next_on_line(tokens, start + 1) {
            Some(idx) if tokens[idx].kind == TokenKind::Ident => idx,
            _ => {
                self.record_error(
                    file,
                    keyword,
                    format!("{block_word} declaration without a name"),
                );
                return skip_to_statement_boundary(tokens, start + 1);
            }
        };
        let name = tokens[name_idx].canonical();

        let body_start = skip_to_line_end(tokens, name_idx + 1);
        match find_block_end(tokens, body_start, &block_word) {
            Some(end_idx) => {
                let body = body_start..end_idx;
                self.collect_sql(tokens, &body, ScriptOwner::Event(name.clone()), file, false);
                collect_call_sites(tokens, &body, ScriptOwner::Event(name.clone()), file);
                file.events.push(ParsedEvent {
                    name,
                    line: keyword.line,
                    body,
                });
                skip_to_line_end(tokens, end_idx + 2)
            }
            None => {
                self.record_error(
                    file,
                    keyword,
                    format!("event '{name}' is not terminated by end {block_word}"),
                );
                let body = body_start..tokens.len();
                self.collect_sql(tokens, &body, ScriptOwner::Event(name.clone()), file, false);
                collect_call_sites(tokens, &body, ScriptOwner::Event(name.clone()), file);
                file.events.push(ParsedEvent {
                    name,
                    line: keyword.line,
                    body,
                });
                tokens.len()
            }
        }
    }

    fn parse_function(&self, tokens: &[Token], start: usize, file: &mut ParsedFile) -> usize {
        let keyword = &tokens[start];
        let block_word = keyword.canonical();

        // declaration idents up to the parameter list; the last one names
        // the function, anything before it is the return type
        let mut cursor = start + 1;
        let mut decl_idents: Vec<(usize, String)> = Vec::new();
        let paren_idx = loop {
            match next_on_line(tokens, cursor) {
                Some(idx) if tokens[idx].kind == TokenKind::Ident => {
                    decl_idents.push((idx, tokens[idx].canonical()));
                    cursor = idx + 1;
                }
                Some(idx) if tokens[idx].is_punct('(') => break Some(idx),
                Some(idx) => {
                    cursor = idx + 1;
                }
                None => break None,
            }
        };

        let (name_idx, name) = match (paren_idx, decl_idents.last()) {
            (Some(_), Some((idx, name))) => (*idx, name.clone()),
            _ => {
                self.record_error(
                    file,
                    keyword,
                    format!("malformed {block_word} declaration"),
                );
                return skip_to_statement_boundary(tokens, start + 1);
            }
        };

        let sig_end = match paren_idx {
            Some(paren) => match find_matching_paren(tokens, paren) {
                Some(close) => close,
                None => {
                    self.record_error(
                        file,
                        keyword,
                        format!("{block_word} '{name}' has an unterminated parameter list"),
                    );
                    return skip_to_statement_boundary(tokens, name_idx + 1);
                }
            },
            None => name_idx,
        };
        let signature = reassemble(tokens, start..sig_end + 1);

        let body_start = skip_to_line_end(tokens, sig_end + 1);
        match find_block_end(tokens, body_start, &block_word) {
            Some(end_idx) => {
                let body = body_start..end_idx;
                self.collect_sql(tokens, &body, ScriptOwner::Function(name.clone()), file, false);
                collect_call_sites(tokens, &body, ScriptOwner::Function(name.clone()), file);
                file.functions.push(ParsedFunction {
                    name,
                    signature,
                    line: keyword.line,
                    body,
                });
                skip_to_line_end(tokens, end_idx + 2)
            }
            None => {
                self.record_error(
                    file,
                    keyword,
                    format!("{block_word} '{name}' is not terminated by end {block_word}"),
                );
                let body = body_start..tokens.len();
                self.collect_sql(tokens, &body, ScriptOwner::Function(name.clone()), file, false);
                collect_call_sites(tokens, &body, ScriptOwner::Function(name.clone()), file);
                file.functions.push(ParsedFunction {
                    name,
                    signature,
                    line: keyword.line,
                    body,
                });
                tokens.len()
            }
        }
    }

    /// Lift embedded SQL blocks out of a token span. When `object_level` is
    /// set, spans inside event/function bodies are skipped so statements are
    /// attributed to their innermost owner only.
    fn collect_sql(
        &self,
        tokens: &[Token],
        span: &Range<usize>,
        owner: ScriptOwner,
        file: &mut ParsedFile,
        object_level: bool,
    ) {
        let mut idx = span.start;
        while idx < span.end.min(tokens.len()) {
            if object_level && owned_by_block(file, idx) {
                idx += 1;
                continue;
            }
            if tokens[idx].kind == TokenKind::SqlBlockStart {
                let keyword = &tokens[idx];
                let mut text = keyword.text.clone();
                let mut terminated = false;
                if let Some(body) = tokens.get(idx + 1) {
                    if body.kind == TokenKind::SqlBlockBody {
                        let body_text = collapse_outside_strings(&body.text);
                        if !body_text.is_empty() {
                            text.push(' ');
                            text.push_str(&body_text);
                        }
                        terminated = matches!(
                            tokens.get(idx + 2).map(|t| t.kind),
                            Some(TokenKind::SqlBlockEnd)
                        );
                    }
                }
                if !terminated {
                    self.record_error(
                        file,
                        keyword,
                        "embedded SQL block is not terminated by a semicolon".to_string(),
                    );
                }
                file.embedded_sql.push(EmbeddedSql {
                    owner: owner.clone(),
                    statement_text: text,
                });
                idx += 3;
            } else {
                idx += 1;
            }
        }
    }

    fn record_error(&self, file: &mut ParsedFile, at: &Token, message: String) {
        file.errors.push(ParseError {
            line: at.line,
            col: at.col,
            message,
        });
        if file.errors.len() >= self.max_errors {
            file.abandoned = true;
        }
    }
}

/// True when the token index falls inside an already-parsed event or
/// function body.
fn owned_by_block(file: &ParsedFile, idx: usize) -> bool {
    file.events.iter().any(|e| e.body.contains(&idx))
        || file.functions.iter().any(|f| f.body.contains(&idx))
}

/// Refine the file kind from a `type <name> from <ancestor>` preamble.
fn refine_kind(kind: SourceKind, tokens: &[Token]) -> SourceKind {
    for window in 0..tokens.len().saturating_sub(3) {
        let token = &tokens[window];
        if token.is_keyword("type") {
            if let Some(name_idx) = next_significant(tokens, window + 1) {
                if tokens[name_idx].kind == TokenKind::Ident {
                    if let Some(from_idx) = next_significant(tokens, name_idx + 1) {
                        if tokens[from_idx].is_keyword("from") {
                            if let Some(anc_idx) = next_significant(tokens, from_idx + 1) {
                                if let Some(refined) =
                                    SourceKind::from_ancestor(&tokens[anc_idx].canonical())
                                {
                                    return refined;
                                }
                            }
                        }
                    }
                }
            }
        }
        if token.kind == TokenKind::Keyword
            && !token.is_keyword("forward")
            && !token.is_keyword("global")
            && !token.is_keyword("type")
        {
            // past the preamble
            break;
        }
    }
    kind
}

/// Scan a body span for call-site patterns.
fn collect_call_sites(
    tokens: &[Token],
    span: &Range<usize>,
    caller: ScriptOwner,
    file: &mut ParsedFile,
) {
    let significant: Vec<usize> = (span.start..span.end.min(tokens.len()))
        .filter(|&i| {
            !matches!(
                tokens[i].kind,
                TokenKind::Comment | TokenKind::Newline
            )
        })
        .collect();

    for (pos, &idx) in significant.iter().enumerate() {
        let token = &tokens[idx];
        let next = significant.get(pos + 1).map(|&i| &tokens[i]);
        let after = significant.get(pos + 2).map(|&i| &tokens[i]);

        // open(w_x) / openwithparm(w_x, arg)
        if (token.is_keyword("open") || token.is_keyword("openwithparm"))
            && next.map(|t| t.is_punct('(')).unwrap_or(false)
        {
            if let Some(target) = after.filter(|t| t.kind == TokenKind::Ident) {
                file.call_sites.push(CallSite {
                    caller: caller.clone(),
                    callee: target.canonical(),
                    kind: CallSiteKind::ScreenOpen,
                });
            }
            continue;
        }

        // triggerevent("ue_x") / triggerevent(ctl, "ue_x") / postevent variants
        if (token.is_keyword("triggerevent") || token.is_keyword("postevent"))
            && next.map(|t| t.is_punct('(')).unwrap_or(false)
        {
            let event_name = match after {
                Some(t) if t.kind == TokenKind::Str => Some(t.string_value()),
                Some(t) if t.kind == TokenKind::Ident => {
                    // two-argument form: skip the control and the comma
                    let comma = significant.get(pos + 3).map(|&i| &tokens[i]);
                    let arg = significant.get(pos + 4).map(|&i| &tokens[i]);
                    match (comma, arg) {
                        (Some(c), Some(a)) if c.is_punct(',') && a.kind == TokenKind::Str => {
                            Some(a.string_value())
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(event_name) = event_name {
                file.call_sites.push(CallSite {
                    caller: caller.clone(),
                    callee: event_name.to_lowercase(),
                    kind: CallSiteKind::EventTrigger,
                });
            }
            continue;
        }

        if token.kind != TokenKind::Ident {
            continue;
        }

        // dw_ctl.method or dw_ctl.property
        if token.canonical().starts_with("dw_")
            && next.map(|t| t.is_punct('.')).unwrap_or(false)
            && after.map(|t| t.kind == TokenKind::Ident).unwrap_or(false)
        {
            file.call_sites.push(CallSite {
                caller: caller.clone(),
                callee: token.canonical(),
                kind: CallSiteKind::DataGridUse,
            });
            continue;
        }

        // plain identifier call candidate (dotted calls included); the
        // analyzer keeps only names declared as functions somewhere in the run
        if next.map(|t| t.is_punct('(')).unwrap_or(false) {
            file.call_sites.push(CallSite {
                caller: caller.clone(),
                callee: token.canonical(),
                kind: CallSiteKind::FunctionCall,
            });
        }
    }
}

/// Next non-comment, non-newline token at or after `from`.
fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| {
        !matches!(tokens[i].kind, TokenKind::Comment | TokenKind::Newline)
    })
}

/// Next non-comment token on the current line, stopping at the newline.
fn next_on_line(tokens: &[Token], from: usize) -> Option<usize> {
    for idx in from..tokens.len() {
        match tokens[idx].kind {
            TokenKind::Comment => continue,
            TokenKind::Newline | TokenKind::Eof => return None,
            _ => return Some(idx),
        }
    }
    None
}

/// Index just past the next newline.
fn skip_to_line_end(tokens: &[Token], from: usize) -> usize {
    let mut idx = from;
    while idx < tokens.len() {
        if tokens[idx].kind == TokenKind::Newline {
            return idx + 1;
        }
        idx += 1;
    }
    idx
}

/// Error recovery: advance to the next statement boundary, a newline
/// followed by a block keyword or a top-level semicolon.
fn skip_to_statement_boundary(tokens: &[Token], from: usize) -> usize {
    let mut idx = from;
    while idx < tokens.len() {
        match tokens[idx].kind {
            TokenKind::Punct if tokens[idx].is_punct(';') => return idx + 1,
            TokenKind::Newline => return idx + 1,
            _ => idx += 1,
        }
    }
    idx
}

/// Find the index of `end <block_word>` scanning from `from`. Nested blocks
/// of the same word are not expected in this grammar.
fn find_block_end(tokens: &[Token], from: usize, block_word: &str) -> Option<usize> {
    let mut idx = from;
    while idx < tokens.len() {
        if tokens[idx].is_keyword("end") {
            if let Some(next_idx) = next_significant(tokens, idx + 1) {
                if tokens[next_idx].is_keyword(block_word) {
                    return Some(idx);
                }
            }
        }
        idx += 1;
    }
    None
}

fn find_matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for idx in open..tokens.len() {
        if tokens[idx].is_punct('(') {
            depth += 1;
        } else if tokens[idx].is_punct(')') {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Reassemble a token span with single spaces between tokens.
fn reassemble(tokens: &[Token], span: Range<usize>) -> String {
    let mut parts = Vec::new();
    for idx in span.start..span.end.min(tokens.len()) {
        match tokens[idx].kind {
            TokenKind::Comment | TokenKind::Newline | TokenKind::Eof => continue,
            _ => parts.push(tokens[idx].text.as_str()),
        }
    }
    parts.join(" ")
}

/// Collapse whitespace runs to single spaces, leaving quoted regions alone.
fn collapse_outside_strings(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut pos = 0;
    let mut pending_space = false;
    while pos < bytes.len() {
        let byte = bytes[pos];
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pending_space = true;
                pos += 1;
            }
            b'\'' | b'"' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                let quote = byte;
                out.push(quote as char);
                pos += 1;
                while pos < bytes.len() {
                    let inner = bytes[pos];
                    out.push(inner as char);
                    pos += 1;
                    if inner == quote {
                        if bytes.get(pos) == Some(&quote) {
                            out.push(quote as char);
                            pos += 1;
                            continue;
                        }
                        break;
                    }
                }
            }
            _ => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(byte as char);
                pos += 1;
            }
        }
    }
    out.trim().to_string()
}
