//! Lossless XML tree for MSBuild property files.
//!
//! Every parsed node keeps the exact source text it came from. Rendering an
//! untouched tree reproduces the input byte-for-byte; only elements whose
//! start tag was edited, or that were created in memory, are re-serialized.
//!
//! The tokenizer assumes well-formed input (callers validate first) but still
//! reports structural problems instead of panicking.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// Text, whitespace, comments, CDATA, processing instructions, doctype.
    Raw(String),
    Element(Element),
}

impl Node {
    pub(crate) fn is_whitespace(&self) -> bool {
        matches!(self, Node::Raw(s) if !s.is_empty() && s.chars().all(char::is_whitespace))
    }

    pub(crate) fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Node::Raw(s) => out.push_str(s),
            Node::Element(e) => e.render(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    name: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub(crate) name: String,
    attrs: Vec<Attribute>,
    pub(crate) children: Vec<Node>,
    /// Source text of the start tag; dropped as soon as the tag is edited.
    raw_start: Option<String>,
    /// Source text of the end tag; `None` for self-closing or new elements.
    raw_end: Option<String>,
    /// Whether `raw_start` is a self-closing tag.
    self_closing: bool,
}

impl Element {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            attrs: Vec::new(),
            children: Vec::new(),
            raw_start: None,
            raw_end: None,
            self_closing: false,
        }
    }

    #[must_use]
    pub(crate) fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    #[must_use]
    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.set_text(text);
        self
    }

    /// Name without any namespace prefix.
    pub(crate) fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute value, appending it if absent. Returns whether the
    /// element changed.
    pub(crate) fn set_attr(&mut self, name: &str, value: &str) -> bool {
        if let Some(attr) = self.attrs.iter_mut().find(|a| a.name == name) {
            if attr.value == value {
                return false;
            }
            attr.value = value.to_owned();
        } else {
            self.attrs.push(Attribute {
                name: name.to_owned(),
                value: value.to_owned(),
            });
        }
        self.raw_start = None;
        true
    }

    /// Rename an attribute in place, keeping its position and value.
    pub(crate) fn rename_attr(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        match self.attrs.iter_mut().find(|a| a.name == from) {
            Some(attr) => {
                to.clone_into(&mut attr.name);
                self.raw_start = None;
                true
            }
            None => false,
        }
    }

    /// Character content of the element, comments excluded, trimmed.
    pub(crate) fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let Node::Raw(s) = child {
                if !s.starts_with('<') {
                    out.push_str(&unescape(s));
                }
            }
        }
        out.trim().to_owned()
    }

    /// Replace all content with `text`. Returns whether the element changed.
    pub(crate) fn set_text(&mut self, text: &str) -> bool {
        let escaped = escape_text(text);
        if self.children.len() == 1 && self.children[0] == Node::Raw(escaped.clone()) {
            return false;
        }
        self.open_up();
        self.children = vec![Node::Raw(escaped)];
        true
    }

    pub(crate) fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Node indexes of child elements matching `pred`.
    pub(crate) fn element_indexes(&self, pred: impl Fn(&Element) -> bool) -> Vec<usize> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| match n {
                Node::Element(e) if pred(e) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn element_at(&self, idx: usize) -> Option<&Element> {
        self.children.get(idx).and_then(Node::as_element)
    }

    pub(crate) fn element_at_mut(&mut self, idx: usize) -> Option<&mut Element> {
        match self.children.get_mut(idx) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Indentation used by this element's children, inferred from existing
    /// children or derived from the element's own indentation.
    pub(crate) fn child_indent(&self, own_indent: &str) -> String {
        for (i, node) in self.children.iter().enumerate() {
            if i == 0 || !matches!(node, Node::Element(_)) {
                continue;
            }
            if let Node::Raw(ws) = &self.children[i - 1] {
                if self.children[i - 1].is_whitespace() {
                    if let Some(nl) = ws.rfind('\n') {
                        return ws[nl + 1..].to_owned();
                    }
                }
            }
        }
        format!("{own_indent}  ")
    }

    /// `\r\n` when the children are already laid out with it, else `\n`.
    fn line_break(&self) -> &'static str {
        let crlf = self
            .children
            .iter()
            .any(|n| n.is_whitespace() && matches!(n, Node::Raw(ws) if ws.contains("\r\n")));
        if crlf {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Insert `child` before the node at `before` (an element index), or at
    /// the end when `None`. The new element gets its own `\n<indent>` line
    /// ahead of the whitespace that already precedes `before`, so
    /// [`Element::remove_element`] undoes it exactly. Returns the node index
    /// of the inserted element.
    pub(crate) fn insert_element(
        &mut self,
        before: Option<usize>,
        child: Element,
        own_indent: &str,
    ) -> usize {
        let indent = self.child_indent(own_indent);
        let nl = self.line_break();
        self.open_up();
        if let Some(at) = before.filter(|&i| i < self.children.len()) {
            if at > 0 && self.children[at - 1].is_whitespace() {
                self.children.insert(at - 1, Node::Element(child));
                self.children.insert(at - 1, Node::Raw(format!("{nl}{indent}")));
                return at;
            }
            // Nothing indents `before`; keep it on its own line after the new element.
            self.children.insert(at, Node::Raw(format!("{nl}{indent}")));
            self.children.insert(at, Node::Element(child));
            return at;
        }
        if self.children.last().is_some_and(Node::is_whitespace) {
            let at = self.children.len() - 1;
            self.children.insert(at, Node::Element(child));
            self.children.insert(at, Node::Raw(format!("{nl}{indent}")));
            at + 1
        } else {
            self.children.push(Node::Raw(format!("{nl}{indent}")));
            self.children.push(Node::Element(child));
            let at = self.children.len() - 1;
            self.children.push(Node::Raw(format!("{nl}{own_indent}")));
            at
        }
    }

    /// Remove the element at node index `idx` together with the line break
    /// and indentation in front of it. Blank lines before that stay put.
    pub(crate) fn remove_element(&mut self, idx: usize) -> Option<Element> {
        if !matches!(self.children.get(idx), Some(Node::Element(_))) {
            return None;
        }
        let Node::Element(removed) = self.children.remove(idx) else {
            return None;
        };
        if idx > 0 && self.children[idx - 1].is_whitespace() {
            let keep = match &self.children[idx - 1] {
                Node::Raw(ws) => ws.rfind('\n').and_then(|nl| {
                    let head = ws[..nl].strip_suffix('\r').unwrap_or(&ws[..nl]);
                    (!head.is_empty()).then(|| head.to_owned())
                }),
                Node::Element(_) => None,
            };
            match keep {
                Some(rest) => self.children[idx - 1] = Node::Raw(rest),
                None => {
                    self.children.remove(idx - 1);
                }
            }
        } else if self.children.get(idx).is_some_and(Node::is_whitespace) {
            self.children.remove(idx);
        }
        Some(removed)
    }

    /// A self-closing tag cannot hold children; switch to an open/close pair.
    fn open_up(&mut self) {
        if self.self_closing {
            self.self_closing = false;
            self.raw_start = None;
            self.raw_end = None;
        }
    }

    fn render(&self, out: &mut String) {
        let has_end = !self.children.is_empty() || self.raw_end.is_some();
        match &self.raw_start {
            Some(raw) => out.push_str(raw),
            None => {
                out.push('<');
                out.push_str(&self.name);
                for attr in &self.attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&attr.value));
                    out.push('"');
                }
                out.push_str(if has_end { ">" } else { " />" });
            }
        }
        if self.raw_start.is_some() && self.self_closing {
            return;
        }
        if !has_end {
            return;
        }
        for child in &self.children {
            child.render(out);
        }
        match &self.raw_end {
            Some(raw) => out.push_str(raw),
            None => {
                out.push_str("</");
                out.push_str(&self.name);
                out.push('>');
            }
        }
    }
}

/// A parsed document: optional BOM, nodes before and after the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XmlTree {
    bom: bool,
    prolog: Vec<Node>,
    pub(crate) root: Element,
    epilog: Vec<Node>,
}

impl XmlTree {
    /// A fresh document with an empty root element.
    pub(crate) fn with_root(name: &str) -> Self {
        Self {
            bom: false,
            prolog: Vec::new(),
            root: Element {
                name: name.to_owned(),
                attrs: Vec::new(),
                children: vec![Node::Raw("\n".to_owned())],
                raw_start: Some(format!("<{name}>")),
                raw_end: Some(format!("</{name}>")),
                self_closing: false,
            },
            epilog: vec![Node::Raw("\n".to_owned())],
        }
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        if self.bom {
            out.push('\u{feff}');
        }
        for node in &self.prolog {
            node.render(&mut out);
        }
        self.root.render(&mut out);
        for node in &self.epilog {
            node.render(&mut out);
        }
        out
    }
}

/// Parse `input` into a lossless tree.
pub(crate) fn parse(input: &str) -> Result<XmlTree, String> {
    let (bom, text) = match input.strip_prefix('\u{feff}') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let mut prolog = Vec::new();
    let mut epilog = Vec::new();
    let mut root: Option<Element> = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        let (node, consumed) = if rest.starts_with('<') {
            if rest.starts_with("<!--") {
                raw_until(rest, "-->", pos)?
            } else if rest.starts_with("<![CDATA[") {
                raw_until(rest, "]]>", pos)?
            } else if rest.starts_with("<?") {
                raw_until(rest, "?>", pos)?
            } else if rest.starts_with("<!") {
                let end = doctype_end(rest).ok_or_else(|| format!("unterminated declaration at byte {pos}"))?;
                (Token::Raw(rest[..end].to_owned()), end)
            } else if rest.starts_with("</") {
                let end = rest
                    .find('>')
                    .map(|i| i + 1)
                    .ok_or_else(|| format!("unterminated end tag at byte {pos}"))?;
                let raw = &rest[..end];
                let name = raw[2..raw.len() - 1].trim();
                (Token::End(name.to_owned(), raw.to_owned()), end)
            } else {
                let end = start_tag_end(rest)
                    .ok_or_else(|| format!("unterminated start tag at byte {pos}"))?;
                let element = parse_start_tag(&rest[..end], pos)?;
                (Token::Start(element), end)
            }
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            (Token::Raw(rest[..end].to_owned()), end)
        };
        pos += consumed;

        match node {
            Token::Raw(s) => {
                let node = Node::Raw(s);
                if let Some(top) = stack.last_mut() {
                    top.children.push(node);
                } else if root.is_none() {
                    prolog.push(node);
                } else {
                    epilog.push(node);
                }
            }
            Token::Start(element) => {
                if element.self_closing {
                    attach(element, &mut stack, &mut root, pos)?;
                } else {
                    stack.push(element);
                }
            }
            Token::End(name, raw) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| format!("unexpected end tag </{name}> at byte {pos}"))?;
                if element.name != name {
                    return Err(format!(
                        "mismatched end tag </{name}> for <{}> at byte {pos}",
                        element.name
                    ));
                }
                element.raw_end = Some(raw);
                attach(element, &mut stack, &mut root, pos)?;
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("element <{}> is never closed", open.name));
    }
    let root = root.ok_or_else(|| "document has no root element".to_owned())?;
    Ok(XmlTree {
        bom,
        prolog,
        root,
        epilog,
    })
}

enum Token {
    Raw(String),
    Start(Element),
    End(String, String),
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
    pos: usize,
) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        Ok(())
    } else if root.is_some() {
        Err(format!("second root element <{}> at byte {pos}", element.name))
    } else {
        *root = Some(element);
        Ok(())
    }
}

fn raw_until(rest: &str, terminator: &str, pos: usize) -> Result<(Token, usize), String> {
    let end = rest
        .find(terminator)
        .map(|i| i + terminator.len())
        .ok_or_else(|| format!("unterminated markup at byte {pos}"))?;
    Ok((Token::Raw(rest[..end].to_owned()), end))
}

/// End of a `<!DOCTYPE ...>` declaration, honoring an internal subset.
fn doctype_end(rest: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in rest.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'>' if depth == 0 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Byte length of the start tag at the front of `rest`, quotes respected.
fn start_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in rest.bytes().enumerate().skip(1) {
        match (quote, b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            (None, _) => {}
        }
    }
    None
}

fn parse_start_tag(raw: &str, pos: usize) -> Result<Element, String> {
    let self_closing = raw.ends_with("/>");
    let inner = &raw[1..raw.len() - if self_closing { 2 } else { 1 }];
    let name_end = inner
        .find(|c: char| c.is_whitespace())
        .unwrap_or(inner.len());
    let name = &inner[..name_end];
    if name.is_empty() {
        return Err(format!("empty element name at byte {pos}"));
    }

    let mut attrs = Vec::new();
    let mut rest = inner[name_end..].trim_start();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| format!("attribute without value in <{name}> at byte {pos}"))?;
        let attr_name = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| format!("unquoted attribute '{attr_name}' in <{name}> at byte {pos}"))?;
        let close = after[1..]
            .find(quote)
            .ok_or_else(|| format!("unterminated attribute '{attr_name}' in <{name}> at byte {pos}"))?;
        attrs.push(Attribute {
            name: attr_name.to_owned(),
            value: unescape(&after[1..1 + close]),
        });
        rest = after[close + 2..].trim_start();
    }

    Ok(Element {
        name: name.to_owned(),
        attrs,
        children: Vec::new(),
        raw_start: Some(raw.to_owned()),
        raw_end: None,
        self_closing,
    })
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
