//! Minimal XML element tree built from `quick-xml` events.
//!
//! Extraction needs "first element with this name anywhere in the document"
//! and "direct children of that element", so a small owned tree is enough.
//! Elements and attributes are matched by qualified name as written, so
//! `<atom:link>` is not a `link`. Non-UTF-8 documents are decoded according
//! to their XML declaration.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// SEC-003: Maximum element nesting depth accepted from a feed document.
const MAX_DEPTH: usize = 256;

/// Errors that can occur while building a [`Document`].
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The bytes are not well-formed XML.
    #[error("Malformed XML: {0}")]
    Malformed(String),

    /// SEC-003: Nesting depth exceeds safety limit.
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and children in document order.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

/// A parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    /// Parse raw bytes (UTF-8) into an element tree.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Malformed`] for syntax errors, mismatched or
    /// unclosed tags, unknown entities, or content outside a single root
    /// element. Returns [`DocumentError::TooDeep`] past [`MAX_DEPTH`].
    ///
    /// # Security
    ///
    /// SEC-002: `quick-xml` (0.37) never expands `<!ENTITY>` declarations;
    /// only the five XML builtins are unescaped.
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| malformed(reader.buffer_position(), e))?;

            match event {
                Event::Start(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(DocumentError::TooDeep(MAX_DEPTH));
                    }
                    stack.push(element_from_start(&e, &reader)?);
                }
                Event::Empty(e) => {
                    let element = element_from_start(&e, &reader)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    // quick-xml checks that end names match their start tags
                    let element = stack.pop().ok_or_else(|| {
                        DocumentError::Malformed("unexpected closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| malformed(reader.buffer_position(), e))?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(e) => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| malformed(reader.buffer_position(), e))?;
                    push_text(&mut stack, &text)?;
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype
                _ => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(DocumentError::Malformed(format!(
                "unclosed element <{}>",
                open.name
            )));
        }

        root.map(|root| Self { root })
            .ok_or_else(|| DocumentError::Malformed("no root element".to_string()))
    }

    /// The document element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// First element named `name` anywhere in the document, in document order.
    pub fn first_element(&self, name: &str) -> Option<&Element> {
        self.root.descendants().find(|e| e.name == name)
    }
}

impl Element {
    /// Qualified name of the element, prefix included.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the attribute with the given qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct child elements in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child element named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// This element and all elements below it, pre-order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

/// Pre-order iterator returned by [`Element::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        // Reverse so the first child is visited first
        let children: Vec<&Element> = next.child_elements().collect();
        self.stack.extend(children.into_iter().rev());
        Some(next)
    }
}

fn malformed(position: impl std::fmt::Display, err: impl std::fmt::Display) -> DocumentError {
    DocumentError::Malformed(format!("{} (at byte {})", err, position))
}

fn element_from_start(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Element, DocumentError> {
    let name = reader
        .decoder()
        .decode(e.name().as_ref())
        .map_err(|e| malformed(reader.buffer_position(), e))?
        .into_owned();
    let mut attributes = Vec::new();

    for attr_result in e.attributes() {
        let attr = attr_result.map_err(|e| malformed(reader.buffer_position(), e))?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|e| malformed(reader.buffer_position(), e))?
            .into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| malformed(reader.buffer_position(), e))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

/// Attach a completed element to its parent, or make it the root.
fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DocumentError::Malformed(
            "multiple root elements".to_string(),
        )),
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Text(text.to_string()));
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(DocumentError::Malformed(
            "text outside the root element".to_string(),
        )),
    }
}
