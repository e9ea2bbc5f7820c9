//! DTD-driven markup parser: tokenizer, validator and recovery driver.
//!
//! The parser reads characters from a pull-based [`CharSource`], validates
//! structural tokens against a grammar through the content-model engine and
//! the tag stack, and reports everything it accepts to a [`ParseSink`].
//! When the input disobeys the grammar, a bounded cascade of repair
//! heuristics runs before the token is dropped; repairs synthesize tags
//! flagged as *implied* so the sink can tell them apart from source tags.
//!
//! The grammar is matched deterministically: the engine never backtracks,
//! and a rejected advance is an ordinary value the driver uses to try the
//! next repair.

pub mod engine;
mod entities;
pub mod sink;
pub mod stack;

pub use sink::{Attributes, ErrorKind, Event, EventCollector, ParseSink};

use crate::engine::Engine;
use crate::stack::TagStack;
use htmldtd_model::{AttModifier, ContentKind, Dtd, ElementIdx, Role};
use log::debug;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pull-based character input. `Ok(None)` is end of stream; errors abort
/// the parse.
pub trait CharSource {
    fn next_char(&mut self) -> io::Result<Option<char>>;
}

/// Characters from an in-memory string.
pub struct StrSource<'a> {
    chars: std::str::Chars<'a>,
}

impl<'a> StrSource<'a> {
    pub fn new(s: &'a str) -> StrSource<'a> {
        StrSource { chars: s.chars() }
    }
}

impl CharSource for StrSource<'_> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        Ok(self.chars.next())
    }
}

/// Incremental UTF-8 decoding over any reader. Invalid sequences decode to
/// U+FFFD rather than failing the parse.
pub struct ReaderSource<R: io::Read> {
    inner: R,
}

impl<R: io::Read> ReaderSource<R> {
    pub fn new(inner: R) -> ReaderSource<R> {
        ReaderSource { inner }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: io::Read> CharSource for ReaderSource<R> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        let b0 = match self.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        if b0 < 0x80 {
            return Ok(Some(b0 as char));
        }
        let width = if b0 & 0xe0 == 0xc0 {
            2
        } else if b0 & 0xf0 == 0xe0 {
            3
        } else if b0 & 0xf8 == 0xf0 {
            4
        } else {
            return Ok(Some(char::REPLACEMENT_CHARACTER));
        };
        let mut buf = [b0, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            match self.next_byte()? {
                Some(b) if b & 0xc0 == 0x80 => *slot = b,
                _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
            }
        }
        match std::str::from_utf8(&buf[..width]) {
            Ok(s) => Ok(s.chars().next()),
            Err(_) => Ok(Some(char::REPLACEMENT_CHARACTER)),
        }
    }
}

/// Fatal parse terminations. Everything else is reported through the sink
/// and parsing continues.
#[derive(Debug)]
pub enum ParseAbort {
    /// The character source failed; open frames were force-closed first so
    /// the sink observed balanced pairs.
    Io(io::Error),
    /// A `<meta>` tag announced a character set. Choosing a decoder and
    /// restarting the parse is the caller's job.
    CharsetChange { content: String, pos: usize },
}

impl std::fmt::Display for ParseAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseAbort::Io(e) => write!(f, "read error: {}", e),
            ParseAbort::CharsetChange { content, pos } => {
                write!(f, "character set changed to {:?} at offset {}", content, pos)
            }
        }
    }
}

impl std::error::Error for ParseAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseAbort::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseAbort {
    fn from(e: io::Error) -> Self {
        ParseAbort::Io(e)
    }
}

/// How a completed parse ended.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Termination {
    Eof,
    /// The stop flag was observed between tokens; open frames were closed
    /// out before returning.
    Stopped,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ParserOptions {
    /// Disables the heuristic recovery steps, surfacing structural errors
    /// instead of repairing them. Omitted-tag inference driven by the
    /// grammar's omissibility flags stays active.
    pub strict: bool,
    /// Suppress the charset-change abort on `<meta>`.
    pub ignore_charset: bool,
}

/// Outcome of the structural-validity cascade for one token.
enum Context {
    Legal,
    Ignore,
    Fail,
}

const MAX_RECOVERY_DEPTH: usize = 24;

pub struct Parser<S: ParseSink> {
    dtd: Arc<Dtd>,
    opts: ParserOptions,
    sink: S,
    engine: Engine,
    stack: TagStack,
    stop: Option<Arc<AtomicBool>>,

    // scanning state
    ch: Option<char>,
    pos: usize,
    primed: bool,
    pushback: Option<char>,

    // text buffering
    text: String,
    text_pos: usize,
    space: bool,
    ignore_space: bool,

    // structural bookkeeping
    seen_root: bool,
    seen_head: bool,
    seen_body: bool,

    // line terminator counters
    crlf: usize,
    cr: usize,
    lf: usize,
}

impl<S: ParseSink> Parser<S> {
    pub fn new(dtd: Arc<Dtd>, sink: S) -> Parser<S> {
        Parser::with_options(dtd, ParserOptions::default(), sink)
    }

    pub fn with_options(dtd: Arc<Dtd>, opts: ParserOptions, sink: S) -> Parser<S> {
        Parser {
            dtd,
            opts,
            sink,
            engine: Engine::new(),
            stack: TagStack::new(),
            stop: None,
            ch: None,
            pos: 0,
            primed: false,
            pushback: None,
            text: String::new(),
            text_pos: 0,
            space: false,
            ignore_space: false,
            seen_root: false,
            seen_head: false,
            seen_body: false,
            crlf: 0,
            cr: 0,
            lf: 0,
        }
    }

    /// Install a cooperative cancellation flag, polled between tokens.
    pub fn set_stop(&mut self, stop: Arc<AtomicBool>) {
        self.stop = Some(stop);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Parse one document. The sink always observes balanced start/end
    /// pairs for whatever was accepted, even when the source fails.
    pub fn parse(&mut self, src: &mut dyn CharSource) -> Result<Termination, ParseAbort> {
        self.reset();
        match self.parse_inner(src) {
            Ok(term) => {
                self.flush_text();
                self.close_all_frames();
                let eol = self.inferred_eol();
                self.sink.end_of_line(eol);
                Ok(term)
            }
            Err(ParseAbort::Io(e)) => {
                self.flush_text();
                self.close_all_frames();
                Err(ParseAbort::Io(e))
            }
            Err(other) => Err(other),
        }
    }

    fn reset(&mut self) {
        self.stack = TagStack::new();
        self.ch = None;
        self.pos = 0;
        self.primed = false;
        self.pushback = None;
        self.text.clear();
        self.text_pos = 0;
        self.space = false;
        self.ignore_space = false;
        self.seen_root = false;
        self.seen_head = false;
        self.seen_body = false;
        self.crlf = 0;
        self.cr = 0;
        self.lf = 0;
    }

    fn parse_inner(&mut self, src: &mut dyn CharSource) -> Result<Termination, ParseAbort> {
        self.bump(src)?;
        loop {
            if let Some(stop) = self.stop.as_ref() {
                if stop.load(Ordering::Relaxed) {
                    return Ok(Termination::Stopped);
                }
            }
            match self.ch {
                None => return Ok(Termination::Eof),
                Some('<') => self.parse_tag(src)?,
                Some('&') => {
                    let at = self.pos;
                    let data = self.parse_entity_ref(src)?;
                    self.append_text_str(&data, at);
                }
                Some('/') if self.top_net() => {
                    let at = self.pos;
                    self.bump(src)?;
                    self.flush_text();
                    self.close_top(false, at);
                }
                Some(c) if is_space(c) && !self.stack.in_preformatted() => {
                    self.space = true;
                    self.bump(src)?;
                }
                Some(c) => {
                    self.append_text_char(c);
                    self.bump(src)?;
                }
            }
        }
    }

    // ---- character input ----

    fn next_raw(&mut self, src: &mut dyn CharSource) -> io::Result<Option<char>> {
        if let Some(c) = self.pushback.take() {
            return Ok(Some(c));
        }
        src.next_char()
    }

    /// Advance to the next character, normalizing `\r` and `\r\n` to `\n`
    /// while counting which form the document uses.
    fn bump(&mut self, src: &mut dyn CharSource) -> Result<(), ParseAbort> {
        let c = match self.next_raw(src)? {
            Some('\r') => match self.next_raw(src)? {
                Some('\n') => {
                    self.crlf += 1;
                    Some('\n')
                }
                other => {
                    self.pushback = other;
                    self.cr += 1;
                    Some('\n')
                }
            },
            Some('\n') => {
                self.lf += 1;
                Some('\n')
            }
            other => other,
        };
        if self.primed {
            self.pos += 1;
        } else {
            self.primed = true;
        }
        self.ch = c;
        Ok(())
    }

    fn inferred_eol(&self) -> &'static str {
        if self.crlf >= self.cr {
            if self.lf >= self.crlf {
                "\n"
            } else {
                "\r\n"
            }
        } else if self.cr > self.lf {
            "\r"
        } else {
            "\n"
        }
    }

    // ---- text buffering ----

    fn materialize_space(&mut self) {
        if self.space {
            self.space = false;
            if !self.ignore_space {
                if self.text.is_empty() {
                    self.text_pos = self.pos;
                }
                self.text.push(' ');
            }
        }
    }

    fn append_text_char(&mut self, c: char) {
        self.materialize_space();
        if self.text.is_empty() {
            self.text_pos = self.pos;
        }
        self.text.push(c);
        self.ignore_space = false;
    }

    fn append_text_str(&mut self, s: &str, at: usize) {
        if s.is_empty() {
            return;
        }
        self.materialize_space();
        if self.text.is_empty() {
            self.text_pos = at;
        }
        self.text.push_str(s);
        self.ignore_space = false;
    }

    /// Emit the pending text run, validating it as a `#pcdata` token unless
    /// the enclosing element takes literal data.
    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let pos = self.text_pos;
        let literal = self
            .stack
            .top()
            .map(|f| {
                matches!(
                    self.dtd.element_at(f.element).kind,
                    ContentKind::Data | ContentKind::RawData
                )
            })
            .unwrap_or(false);
        if literal || self.validate_token(self.dtd.well_known().pcdata) {
            self.sink.text(&text, pos);
        }
    }

    // ---- tag scanning ----

    fn parse_tag(&mut self, src: &mut dyn CharSource) -> Result<(), ParseAbort> {
        let tag_pos = self.pos;
        self.bump(src)?;
        match self.ch {
            Some('!') => {
                self.bump(src)?;
                if self.ch == Some('-') {
                    self.bump(src)?;
                    if self.ch == Some('-') {
                        self.bump(src)?;
                        self.parse_comment(src, tag_pos)?;
                    } else {
                        self.sink
                            .error(ErrorKind::Lexical, "malformed comment open", tag_pos);
                        self.skip_to_gt(src)?;
                    }
                } else if self.ch == Some('>') {
                    // <!> is an empty comment
                    self.bump(src)?;
                    self.flush_text();
                    self.sink.comment("", tag_pos);
                } else {
                    self.parse_markup_declaration(src, tag_pos)?;
                }
            }
            Some('/') => {
                self.bump(src)?;
                self.parse_end_tag(src, tag_pos)?;
            }
            Some(c) if c.is_ascii_alphabetic() => {
                self.parse_start_tag(src, tag_pos)?;
            }
            _ => {
                // not a tag after all; the '<' is data
                self.sink
                    .error(ErrorKind::Lexical, "expected a tag name after '<'", tag_pos);
                self.append_text_char('<');
            }
        }
        Ok(())
    }

    fn parse_comment(&mut self, src: &mut dyn CharSource, tag_pos: usize) -> Result<(), ParseAbort> {
        let mut buf = String::new();
        loop {
            match self.ch {
                None => {
                    self.sink
                        .error(ErrorKind::Lexical, "unterminated comment", tag_pos);
                    break;
                }
                Some('>') if buf.ends_with("--") => {
                    buf.truncate(buf.len() - 2);
                    self.bump(src)?;
                    break;
                }
                Some('>') if buf.ends_with("--!") => {
                    buf.truncate(buf.len() - 3);
                    self.sink
                        .error(ErrorKind::Lexical, "malformed comment end", self.pos);
                    self.bump(src)?;
                    break;
                }
                Some(c) => {
                    buf.push(c);
                    self.bump(src)?;
                }
            }
        }
        self.flush_text();
        self.sink.comment(&buf, tag_pos);
        Ok(())
    }

    /// Only a DOCTYPE skip is implemented; any other markup declaration is
    /// consumed and discarded with an error.
    fn parse_markup_declaration(
        &mut self,
        src: &mut dyn CharSource,
        tag_pos: usize,
    ) -> Result<(), ParseAbort> {
        let mut name = String::new();
        while let Some(c) = self.ch {
            if c.is_ascii_alphabetic() {
                name.push(c.to_ascii_lowercase());
                self.bump(src)?;
            } else {
                break;
            }
        }
        if name != "doctype" {
            self.sink.error(
                ErrorKind::Lexical,
                &format!("markup declaration <!{}> not supported", name),
                tag_pos,
            );
        }
        self.skip_to_gt(src)
    }

    /// Consume through the closing `>` of a declaration, honoring quoted
    /// sections.
    fn skip_to_gt(&mut self, src: &mut dyn CharSource) -> Result<(), ParseAbort> {
        let mut quote: Option<char> = None;
        loop {
            match self.ch {
                None => {
                    self.sink
                        .error(ErrorKind::Lexical, "unterminated markup declaration", self.pos);
                    return Ok(());
                }
                Some(c) => {
                    self.bump(src)?;
                    match quote {
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None if c == '"' || c == '\'' => quote = Some(c),
                        None if c == '>' => return Ok(()),
                        None => {}
                    }
                }
            }
        }
    }

    fn parse_end_tag(&mut self, src: &mut dyn CharSource, tag_pos: usize) -> Result<(), ParseAbort> {
        let mut name = String::new();
        while let Some(c) = self.ch {
            if is_name_char(c) {
                name.push(c.to_ascii_lowercase());
                self.bump(src)?;
            } else {
                break;
            }
        }
        while matches!(self.ch, Some(c) if is_space(c)) {
            self.bump(src)?;
        }
        match self.ch {
            Some('>') => {
                self.bump(src)?;
            }
            None => {
                self.sink
                    .error(ErrorKind::Lexical, "unterminated end tag", tag_pos);
            }
            Some(_) => {
                self.sink
                    .error(ErrorKind::Lexical, "malformed end tag", tag_pos);
                self.skip_to_gt(src)?;
            }
        }
        if name.is_empty() {
            // SGML empty end tag: close the innermost open element
            self.flush_text();
            if self.stack.is_empty() {
                self.sink
                    .error(ErrorKind::Structural, "end tag with nothing open", tag_pos);
            } else {
                self.close_top(false, tag_pos);
            }
            return Ok(());
        }
        self.handle_end_tag(&name, tag_pos);
        Ok(())
    }

    fn parse_start_tag(&mut self, src: &mut dyn CharSource, tag_pos: usize) -> Result<(), ParseAbort> {
        let mut name = String::new();
        while let Some(c) = self.ch {
            if is_name_char(c) {
                name.push(c.to_ascii_lowercase());
                self.bump(src)?;
            } else {
                break;
            }
        }
        let mut raw: Vec<(String, Option<String>)> = Vec::new();
        let mut net = false;
        loop {
            while matches!(self.ch, Some(c) if is_space(c)) {
                self.bump(src)?;
            }
            match self.ch {
                None => {
                    self.sink
                        .error(ErrorKind::Lexical, "end of input inside a tag", tag_pos);
                    return Ok(());
                }
                Some('>') => {
                    self.bump(src)?;
                    break;
                }
                Some('/') => {
                    self.bump(src)?;
                    if self.ch == Some('>') {
                        self.bump(src)?;
                    } else {
                        // SGML null-end-tag form: <name/.../
                        net = true;
                    }
                    break;
                }
                Some(c) if is_name_char(c) => {
                    self.parse_attribute(src, &mut raw)?;
                }
                Some(_) => {
                    self.sink
                        .error(ErrorKind::Lexical, "malformed tag", self.pos);
                    self.bump(src)?;
                }
            }
        }
        self.handle_start_tag(src, &name, raw, tag_pos, net)
    }

    fn parse_attribute(
        &mut self,
        src: &mut dyn CharSource,
        raw: &mut Vec<(String, Option<String>)>,
    ) -> Result<(), ParseAbort> {
        let mut name = String::new();
        while let Some(c) = self.ch {
            if is_name_char(c) {
                name.push(c.to_ascii_lowercase());
                self.bump(src)?;
            } else {
                break;
            }
        }
        while matches!(self.ch, Some(c) if is_space(c)) {
            self.bump(src)?;
        }
        if self.ch == Some('=') {
            self.bump(src)?;
            while matches!(self.ch, Some(c) if is_space(c)) {
                self.bump(src)?;
            }
            let value = self.parse_attribute_value(src)?;
            raw.push((name, Some(value)));
        } else {
            raw.push((name, None));
        }
        Ok(())
    }

    fn parse_attribute_value(&mut self, src: &mut dyn CharSource) -> Result<String, ParseAbort> {
        let mut value = String::new();
        match self.ch {
            Some(q @ ('"' | '\'')) => {
                self.bump(src)?;
                loop {
                    match self.ch {
                        None => {
                            self.sink.error(
                                ErrorKind::Lexical,
                                "unterminated attribute value",
                                self.pos,
                            );
                            break;
                        }
                        Some(c) if c == q => {
                            self.bump(src)?;
                            break;
                        }
                        Some('&') => {
                            let data = self.parse_entity_ref(src)?;
                            value.push_str(&data);
                        }
                        Some(c) => {
                            value.push(c);
                            self.bump(src)?;
                        }
                    }
                }
            }
            _ => loop {
                match self.ch {
                    None | Some('>') => break,
                    Some(c) if is_space(c) => break,
                    Some('&') => {
                        let data = self.parse_entity_ref(src)?;
                        value.push_str(&data);
                    }
                    Some(c) => {
                        value.push(c);
                        self.bump(src)?;
                    }
                }
            },
        }
        Ok(value)
    }

    // ---- entity references ----

    /// Resolve the reference starting at the current `&`. Failures are
    /// reported and the literal source text is returned as data.
    fn parse_entity_ref(&mut self, src: &mut dyn CharSource) -> Result<String, ParseAbort> {
        let amp_pos = self.pos;
        self.bump(src)?;
        match self.ch {
            Some('#') => {
                self.bump(src)?;
                let hex = matches!(self.ch, Some('x') | Some('X'));
                if hex {
                    self.bump(src)?;
                }
                let mut digits = String::new();
                while let Some(c) = self.ch {
                    let is_digit = if hex {
                        c.is_ascii_hexdigit()
                    } else {
                        c.is_ascii_digit()
                    };
                    if is_digit {
                        digits.push(c);
                        self.bump(src)?;
                    } else {
                        break;
                    }
                }
                let semi = self.ch == Some(';');
                if semi {
                    self.bump(src)?;
                }
                match entities::decode_numeric(&digits, hex) {
                    Some(c) => Ok(c.to_string()),
                    None => {
                        self.sink.error(
                            ErrorKind::Entity,
                            "malformed numeric character reference",
                            amp_pos,
                        );
                        Ok(format!(
                            "&#{}{}{}",
                            if hex { "x" } else { "" },
                            digits,
                            if semi { ";" } else { "" }
                        ))
                    }
                }
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(c) = self.ch {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                        name.push(c);
                        self.bump(src)?;
                    } else {
                        break;
                    }
                }
                let semi = self.ch == Some(';');
                if semi {
                    self.bump(src)?;
                } else {
                    self.sink.error(
                        ErrorKind::Lexical,
                        &format!("missing ';' after &{}", name),
                        amp_pos,
                    );
                }
                let found = self.dtd.entity(&name).or_else(|| {
                    if self.opts.strict {
                        None
                    } else {
                        self.dtd.entity_ignore_case(&name)
                    }
                });
                match found {
                    Some(ent) => Ok(ent.data.clone()),
                    None => {
                        self.sink.error(
                            ErrorKind::Entity,
                            &format!("unknown entity &{};", name),
                            amp_pos,
                        );
                        Ok(format!("&{}{}", name, if semi { ";" } else { "" }))
                    }
                }
            }
            _ => Ok("&".to_string()),
        }
    }

    // ---- structural handling ----

    fn handle_start_tag(
        &mut self,
        src: &mut dyn CharSource,
        name: &str,
        raw: Vec<(String, Option<String>)>,
        tag_pos: usize,
        net: bool,
    ) -> Result<(), ParseAbort> {
        self.flush_text();
        let idx = match self.dtd.element_idx(name) {
            Some(i) => i,
            None => {
                self.sink.error(
                    ErrorKind::Structural,
                    &format!("<{}> is not declared in grammar {:?}", name, self.dtd.name()),
                    tag_pos,
                );
                Arc::make_mut(&mut self.dtd).get_or_create(name)
            }
        };
        if !self.opts.ignore_charset && idx == self.dtd.well_known().meta {
            if let Some(content) = charset_signal(&raw) {
                return Err(ParseAbort::CharsetChange {
                    content,
                    pos: tag_pos,
                });
            }
        }
        if !self.validate_token(idx) {
            return Ok(());
        }
        let dtd = self.dtd.clone();
        let elem = dtd.element_at(idx);
        let attrs = self.build_attributes(idx, raw, tag_pos);
        self.sink.start_tag(&elem.name, attrs, tag_pos, false);
        match elem.kind {
            ContentKind::Empty => {
                self.sink.end_tag(&elem.name, tag_pos, true);
            }
            ContentKind::Data | ContentKind::RawData => {
                self.stack.push(&dtd, &self.engine, idx, false, net, tag_pos);
                if elem.breaks_flow {
                    self.space = false;
                    self.ignore_space = true;
                }
                return self.parse_literal(src, idx);
            }
            _ => {
                self.stack.push(&dtd, &self.engine, idx, false, net, tag_pos);
            }
        }
        if elem.breaks_flow {
            self.space = false;
            self.ignore_space = true;
        }
        Ok(())
    }

    fn handle_end_tag(&mut self, name: &str, tag_pos: usize) {
        self.flush_text();
        let idx = match self.dtd.element_idx(name) {
            Some(i) => i,
            None => {
                self.sink.error(
                    ErrorKind::Structural,
                    &format!("end tag </{}> for unknown element", name),
                    tag_pos,
                );
                return;
            }
        };
        let found = match self.stack.find(idx) {
            Some(i) => i,
            None => {
                self.sink.error(
                    ErrorKind::Structural,
                    &format!("end tag </{}> without matching start tag", name),
                    tag_pos,
                );
                return;
            }
        };
        let top = self.stack.depth() - 1;
        // font- and center-like markup may not force-close unrelated
        // structure; an unmatched such end tag is dropped
        if found != top
            && matches!(self.dtd.element_at(idx).role, Role::Font | Role::Center)
        {
            return;
        }
        while self.stack.depth() - 1 > found {
            self.close_top(true, tag_pos);
        }
        self.close_top(false, tag_pos);
    }

    /// Scan the literal content of a plain-data or raw-data element up to
    /// its closing tag. Raw data expands entities; plain data does not.
    fn parse_literal(&mut self, src: &mut dyn CharSource, idx: ElementIdx) -> Result<(), ParseAbort> {
        let dtd = self.dtd.clone();
        let elem = dtd.element_at(idx);
        let expand = elem.kind == ContentKind::RawData;
        let start = self.pos;
        let mut buf = String::new();
        loop {
            match self.ch {
                None => {
                    self.sink.error(
                        ErrorKind::Lexical,
                        &format!("unterminated <{}> content", elem.name),
                        start,
                    );
                    break;
                }
                Some('<') => {
                    self.bump(src)?;
                    if self.ch != Some('/') {
                        buf.push('<');
                        continue;
                    }
                    self.bump(src)?;
                    let mut close = String::new();
                    while let Some(c) = self.ch {
                        if c.is_ascii_alphanumeric() {
                            close.push(c);
                            self.bump(src)?;
                        } else {
                            break;
                        }
                    }
                    if close.eq_ignore_ascii_case(&elem.name) {
                        loop {
                            match self.ch {
                                Some('>') => {
                                    self.bump(src)?;
                                    break;
                                }
                                Some(_) => self.bump(src)?,
                                None => break,
                            }
                        }
                        if !buf.is_empty() {
                            self.sink.text(&buf, start);
                        }
                        self.close_top(false, self.pos);
                        return Ok(());
                    }
                    buf.push('<');
                    buf.push('/');
                    buf.push_str(&close);
                }
                Some('&') if expand => {
                    let data = self.parse_entity_ref(src)?;
                    buf.push_str(&data);
                }
                Some(c) => {
                    buf.push(c);
                    self.bump(src)?;
                }
            }
        }
        // end of input inside the element; the close-out pass balances it
        if !buf.is_empty() {
            self.sink.text(&buf, start);
        }
        Ok(())
    }

    fn build_attributes(
        &mut self,
        idx: ElementIdx,
        raw: Vec<(String, Option<String>)>,
        tag_pos: usize,
    ) -> Attributes {
        let dtd = self.dtd.clone();
        let elem = dtd.element_at(idx);
        let mut attrs = Attributes::new();
        for (rname, rvalue) in raw {
            match rvalue {
                Some(value) => {
                    if attrs.contains(&rname) {
                        self.sink.error(
                            ErrorKind::Attribute,
                            &format!("duplicate attribute {}", rname),
                            tag_pos,
                        );
                        continue;
                    }
                    match elem.attribute(&rname) {
                        Some(att) => {
                            if att.values.is_some() && !att.contains_value(&value) {
                                self.sink.error(
                                    ErrorKind::Attribute,
                                    &format!("value {:?} not legal for {}", value, rname),
                                    tag_pos,
                                );
                            }
                        }
                        None => {
                            self.sink.error(
                                ErrorKind::Attribute,
                                &format!("unknown attribute {} for <{}>", rname, elem.name),
                                tag_pos,
                            );
                        }
                    }
                    attrs.push(rname, Some(value));
                }
                None => {
                    // a bare word may be a legal value of some attribute
                    // (e.g. `selected`), otherwise it is a valueless flag
                    if let Some(att) = elem.attribute_by_value(&rname) {
                        if attrs.contains(&att.name) {
                            self.sink.error(
                                ErrorKind::Attribute,
                                &format!("duplicate attribute {}", att.name),
                                tag_pos,
                            );
                            continue;
                        }
                        attrs.push(att.name.clone(), Some(rname));
                    } else {
                        if attrs.contains(&rname) {
                            self.sink.error(
                                ErrorKind::Attribute,
                                &format!("duplicate attribute {}", rname),
                                tag_pos,
                            );
                            continue;
                        }
                        if elem.attribute(&rname).is_none() {
                            self.sink.error(
                                ErrorKind::Attribute,
                                &format!("unknown attribute {} for <{}>", rname, elem.name),
                                tag_pos,
                            );
                        }
                        attrs.push(rname, None);
                    }
                }
            }
        }
        for att in &elem.atts {
            if attrs.contains(&att.name) {
                continue;
            }
            if att.modifier == AttModifier::Required {
                self.sink.error(
                    ErrorKind::Attribute,
                    &format!("required attribute {} missing from <{}>", att.name, elem.name),
                    tag_pos,
                );
            } else if let Some(default) = att.default.as_ref() {
                attrs.push(att.name.clone(), Some(default.clone()));
            }
        }
        attrs
    }

    // ---- recovery cascade ----

    /// Run the structural-validity cascade for `elem`; on an unrecoverable
    /// failure, resynchronize into the document body and retry once.
    fn validate_token(&mut self, elem: ElementIdx) -> bool {
        match self.legal_element_context(elem, 0) {
            Context::Legal => true,
            Context::Ignore => false,
            Context::Fail => {
                self.resynchronize();
                matches!(self.legal_element_context(elem, 0), Context::Legal)
            }
        }
    }

    fn legal_element_context(&mut self, elem: ElementIdx, depth: usize) -> Context {
        if depth > MAX_RECOVERY_DEPTH {
            self.sink
                .error(ErrorKind::Structural, "recovery did not converge", self.pos);
            return Context::Fail;
        }
        let dtd = self.dtd.clone();
        let wk = *dtd.well_known();

        // an empty stack means the root element is implied
        if self.stack.is_empty() {
            if elem != wk.html {
                self.implied_start(wk.html);
                return self.legal_element_context(elem, depth + 1);
            }
            self.mark_first_time(elem);
            return Context::Legal;
        }

        if let Some(top) = self.stack.top_mut() {
            if top.advance(&dtd, &mut self.engine, elem) {
                self.mark_first_time(elem);
                return Context::Legal;
            }
        }

        let strict = self.opts.strict;
        let role = dtd.element_at(elem).role;
        let top_idx = self.stack.top().map(|f| f.element).unwrap_or(wk.html);
        let top_role = dtd.element_at(top_idx).role;

        // drop tokens matching known nonsense patterns
        if !strict {
            if role.is_unique_structural() && self.seen(role) {
                self.sink.error(
                    ErrorKind::Structural,
                    &format!("repeated <{}> ignored", dtd.element_at(elem).name),
                    self.pos,
                );
                return Context::Ignore;
            }
            if matches!(top_role, Role::Table | Role::TableRow)
                && !matches!(role, Role::TableRow | Role::TableCell)
            {
                self.sink.error(
                    ErrorKind::Structural,
                    &format!(
                        "{} not allowed directly inside <{}>; ignored",
                        describe(&dtd, elem, wk.pcdata),
                        dtd.element_at(top_idx).name
                    ),
                    self.pos,
                );
                return Context::Ignore;
            }
        }

        // bridge the missing row between a table and a stray cell
        if !strict && top_role == Role::Table && role == Role::TableCell {
            debug!("bridging <{}> with an implied <tr>", dtd.element_at(elem).name);
            self.implied_start(wk.tr);
            return self.legal_element_context(elem, depth + 1);
        }

        // close terminable ancestors whose end tags may be omitted until
        // one of them accepts the token
        {
            let len = self.stack.depth();
            let mut k = len;
            while k > 0 {
                let frame = self.stack.frame(k - 1);
                let fe = dtd.element_at(frame.element);
                if !(frame.terminate(&dtd, &self.engine) && (fe.omit_end || !strict)) {
                    break;
                }
                if k >= 2
                    && self
                        .stack
                        .frame(k - 2)
                        .accepts(&dtd, &mut self.engine, elem)
                {
                    for _ in 0..(len - (k - 1)) {
                        self.close_top(true, self.pos);
                    }
                    return self.legal_element_context(elem, depth + 1);
                }
                k -= 1;
            }
        }

        // insert the single element the model unconditionally predicts
        if let Some(top) = self.stack.top() {
            if let Some(required) = top.first(&dtd, &self.engine) {
                let re = dtd.element_at(required);
                if required != elem && (re.omit_start || !strict) {
                    debug!("implying required <{}>", re.name);
                    self.implied_start(required);
                    return self.legal_element_context(elem, depth + 1);
                }
            }
        }

        // try opening any element reachable from the model that could
        // contain the token
        if !strict {
            if let Some(model) = dtd.element_at(top_idx).content.as_ref() {
                for cand in model.leaf_elements() {
                    if cand == elem || cand == wk.pcdata {
                        continue;
                    }
                    let ce = dtd.element_at(cand);
                    if ce.has_required_attribute() {
                        continue;
                    }
                    if self.stack.top().map(|f| f.excludes(cand)).unwrap_or(false) {
                        continue;
                    }
                    let cmodel = match ce.content.as_ref() {
                        Some(m) => m,
                        None => continue,
                    };
                    if !self.engine.can_start(cmodel, cmodel.root(), elem) {
                        continue;
                    }
                    let top_accepts = self
                        .stack
                        .top()
                        .map(|f| f.accepts(&dtd, &mut self.engine, cand))
                        .unwrap_or(false);
                    if !top_accepts {
                        continue;
                    }
                    debug!("implying container <{}>", ce.name);
                    self.implied_start(cand);
                    return self.legal_element_context(elem, depth + 1);
                }
            }
        }

        // close the top element if it may end here
        if let Some(top) = self.stack.top() {
            let te = dtd.element_at(top.element);
            if top.element != wk.body
                && top.terminate(&dtd, &self.engine)
                && (te.omit_end || !strict)
            {
                self.close_top(true, self.pos);
                return self.legal_element_context(elem, depth + 1);
            }
        }

        self.sink.error(
            ErrorKind::Structural,
            &format!("{} is not legal here", describe(&dtd, elem, wk.pcdata)),
            self.pos,
        );
        Context::Fail
    }

    /// Force the stream back into the document body: close frames down to
    /// body, synthesizing it (and whatever it needs) when absent.
    fn resynchronize(&mut self) {
        let wk = *self.dtd.well_known();
        while let Some(top) = self.stack.top() {
            if top.element == wk.body {
                return;
            }
            self.close_top(true, self.pos);
        }
        if matches!(self.legal_element_context(wk.body, 0), Context::Legal) {
            self.open_implied(wk.body);
        }
    }

    /// Synthesize a start tag: consume it from the enclosing model when
    /// possible, then open the frame.
    fn implied_start(&mut self, elem: ElementIdx) {
        let dtd = self.dtd.clone();
        if let Some(top) = self.stack.top_mut() {
            let _ = top.advance(&dtd, &mut self.engine, elem);
        }
        self.open_implied(elem);
    }

    fn open_implied(&mut self, elem: ElementIdx) {
        let dtd = self.dtd.clone();
        let e = dtd.element_at(elem);
        let mut attrs = Attributes::new();
        for att in &e.atts {
            if let Some(default) = att.default.as_ref() {
                attrs.push(att.name.clone(), Some(default.clone()));
            }
        }
        self.sink.start_tag(&e.name, attrs, self.pos, true);
        self.stack
            .push(&dtd, &self.engine, elem, true, false, self.pos);
        self.mark_first_time(elem);
        if e.breaks_flow {
            self.space = false;
            self.ignore_space = true;
        }
    }

    fn close_top(&mut self, implied: bool, pos: usize) {
        if let Some(frame) = self.stack.pop() {
            let dtd = self.dtd.clone();
            let elem = dtd.element_at(frame.element);
            self.sink.end_tag(&elem.name, pos, implied);
            if elem.breaks_flow {
                self.space = false;
                self.ignore_space = true;
            }
        }
    }

    fn close_all_frames(&mut self) {
        while !self.stack.is_empty() {
            self.close_top(true, self.pos);
        }
    }

    fn mark_first_time(&mut self, elem: ElementIdx) {
        match self.dtd.element_at(elem).role {
            Role::Root => self.seen_root = true,
            Role::Head => self.seen_head = true,
            Role::Body => self.seen_body = true,
            _ => {}
        }
    }

    fn seen(&self, role: Role) -> bool {
        match role {
            Role::Root => self.seen_root,
            Role::Head => self.seen_head,
            Role::Body => self.seen_body,
            _ => false,
        }
    }

    fn top_net(&self) -> bool {
        self.stack.top().map(|f| f.net).unwrap_or(false)
    }
}

fn describe(dtd: &Dtd, elem: ElementIdx, pcdata: ElementIdx) -> String {
    if elem == pcdata {
        "text".to_string()
    } else {
        format!("<{}>", dtd.element_at(elem).name)
    }
}

fn charset_signal(raw: &[(String, Option<String>)]) -> Option<String> {
    for (name, value) in raw {
        if name == "charset" {
            if let Some(v) = value {
                return Some(v.clone());
            }
        }
    }
    let mut http_equiv = None;
    let mut content = None;
    for (name, value) in raw {
        match name.as_str() {
            "http-equiv" => http_equiv = value.as_deref(),
            "content" => content = value.as_deref(),
            _ => {}
        }
    }
    match (http_equiv, content) {
        (Some(he), Some(c)) if he.eq_ignore_ascii_case("content-type") => Some(c.to_string()),
        _ => None,
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':')
}

/// Render collected errors as source-anchored diagnostics.
pub fn diagnostics(
    name: String,
    source: String,
    errors: impl IntoIterator<Item = (ErrorKind, String, usize)>,
) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
    let mut map = codemap::CodeMap::new();
    let file = map.add_file(name, source);
    let mut out = Vec::new();
    for (kind, message, pos) in errors {
        let src = file.source();
        let byte = src
            .char_indices()
            .nth(pos)
            .map(|(b, _)| b)
            .unwrap_or(src.len());
        let end = (byte + 1).min(src.len());
        let label = codemap_diagnostic::SpanLabel {
            span: file.span.subspan(byte as u64, end.max(byte) as u64),
            label: Some(
                match kind {
                    ErrorKind::Lexical => "lexical",
                    ErrorKind::Structural => "structural",
                    ErrorKind::Attribute => "attribute",
                    ErrorKind::Entity => "entity",
                }
                .to_string(),
            ),
            style: codemap_diagnostic::SpanStyle::Primary,
        };
        out.push(codemap_diagnostic::Diagnostic {
            level: codemap_diagnostic::Level::Error,
            message,
            code: None,
            spans: vec![label],
        });
    }
    (map, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use htmldtd_model::html;

    fn parse(input: &str) -> EventCollector {
        let mut parser = Parser::new(html::dtd(), EventCollector::new());
        let mut src = StrSource::new(input);
        parser.parse(&mut src).expect("parse should not abort");
        parser.into_sink()
    }

    #[test]
    fn plain_text_implies_document_structure() {
        let events = parse("hello");
        assert_eq!(
            events.outline(),
            vec![
                "<~html>", "<~head>", "</~head>", "<~body>", "'hello'", "</~body>", "</~html>",
            ]
        );
    }

    #[test]
    fn reader_source_decodes_multibyte() {
        let bytes: &[u8] = "caf\u{e9}".as_bytes();
        let mut src = ReaderSource::new(bytes);
        let mut out = String::new();
        while let Some(c) = src.next_char().unwrap() {
            out.push(c);
        }
        assert_eq!(out, "caf\u{e9}");
    }

    #[test]
    fn reader_source_replaces_invalid_bytes() {
        let bytes: &[u8] = b"a\xffb";
        let mut src = ReaderSource::new(bytes);
        let mut out = String::new();
        while let Some(c) = src.next_char().unwrap() {
            out.push(c);
        }
        assert_eq!(out, "a\u{fffd}b");
    }

    #[test]
    fn eol_inference_prefers_majority() {
        let mut parser = Parser::new(html::dtd(), EventCollector::new());
        let mut src = StrSource::new("a\nb\nc\nd\ne\nf\r\ng");
        parser.parse(&mut src).unwrap();
        let events = parser.into_sink();
        assert!(events
            .events
            .iter()
            .any(|e| matches!(e, Event::EndOfLine { eol } if eol == "\n")));
    }

    #[test]
    fn stop_flag_unwinds_cleanly() {
        let stop = Arc::new(AtomicBool::new(true));
        let mut parser = Parser::new(html::dtd(), EventCollector::new());
        parser.set_stop(stop);
        let mut src = StrSource::new("<p>never seen");
        let term = parser.parse(&mut src).unwrap();
        assert_eq!(term, Termination::Stopped);
    }
}
