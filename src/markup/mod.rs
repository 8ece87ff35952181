//! Structured-markup node shape
//!
//! [`Element`] is the in-memory form of a `.psyexp` document: a name, an
//! ordered attribute list and child elements. Text content carries no
//! meaning in the format and is dropped on read.
//!
//! Reading and writing markup text goes through `quick-xml`.

use std::fmt::Display;

use indexmap::IndexMap;
use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::{Error, Result};

/// A markup element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Element name
    pub name: String,
    /// Attributes in document order
    pub attributes: IndexMap<String, String>,
    /// Child elements in document order
    pub children: Vec<Element>,
}

fn markup_err(err: impl Display) -> Error {
    Error::Markup(err.to_string())
}

/// Escape an attribute value, writing line breaks as character references
/// so multi-line values survive re-reading.
fn escape_attribute(value: &str) -> String {
    escape(value).replace('\n', "&#10;").replace('\r', "&#13;").replace('\t', "&#9;")
}

impl Element {
    /// Create an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder form of [`Element::set_attribute`].
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder form of [`Element::push_child`].
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.push_child(child);
        self
    }

    /// Set (or replace) an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    /// Get an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Append a child element.
    pub fn push_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// First child element with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|child| child.name == name)
    }

    /// First child element with the given name, as a required lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingElement`] when there is no such child.
    pub fn require_child(&self, name: &str) -> Result<&Self> {
        self.child(name).ok_or_else(|| Error::MissingElement {
            parent: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// All child elements with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Parse markup text and return its document element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Markup`] when the text is not well-formed or has no
    /// document element.
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        let mut open: Vec<Self> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => open.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::close(&mut open, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| Error::Markup("unexpected closing tag".to_string()))?;
                    Self::close(&mut open, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !open.is_empty() {
            return Err(Error::Markup(format!("unclosed element <{}>", open[open.len() - 1].name)));
        }
        root.ok_or_else(|| Error::Markup("document has no root element".to_string()))
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let mut element = Self::new(String::from_utf8_lossy(start.name().as_ref()));
        for attribute in start.attributes() {
            let attribute = attribute.map_err(markup_err)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(markup_err)?.into_owned();
            element.attributes.insert(key, value);
        }
        Ok(element)
    }

    fn close(open: &mut [Self], root: &mut Option<Self>, element: Self) -> Result<()> {
        match open.last_mut() {
            Some(parent) => parent.push_child(element),
            None if root.is_none() => *root = Some(element),
            None => return Err(Error::Markup("multiple root elements".to_string())),
        }
        Ok(())
    }

    /// Write this element as an indented markup document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Markup`] if the writer fails.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(markup_err)?;
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(markup_err)
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            let value = escape_attribute(value);
            start.push_attribute(Attribute::from((key.as_bytes(), value.as_bytes())));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(markup_err)?;
            return Ok(());
        }
        writer.write_event(Event::Start(start)).map_err(markup_err)?;
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(markup_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let text = r#"<?xml version="1.0" ?>
<PsychoPy2experiment encoding="utf-8" version="2024.2.4">
  <Settings>
    <Param name="expName" val="stroop &amp; co" valType="str" updates="None"/>
  </Settings>
  <Flow/>
</PsychoPy2experiment>"#;

        let root = Element::parse(text).unwrap();
        assert_eq!(root.name, "PsychoPy2experiment");
        assert_eq!(root.attribute("version"), Some("2024.2.4"));
        assert_eq!(root.children.len(), 2);

        let param = root.child("Settings").unwrap().child("Param").unwrap();
        assert_eq!(param.attribute("val"), Some("stroop & co"));
        assert!(root.child("Flow").unwrap().children.is_empty());
    }

    #[test]
    fn test_write_then_parse_preserves_structure() {
        let element = Element::new("Routine")
            .with_attribute("name", "trial")
            .with_child(Element::new("Param").with_attribute("val", "<\"quoted\">"))
            .with_child(Element::new("Param").with_attribute("val", "line one\nline two"));

        let text = element.to_xml_string().unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("line one&#10;line two"));
        assert_eq!(Element::parse(&text).unwrap(), element);
    }

    #[test]
    fn test_parse_rejects_unclosed() {
        let err = Element::parse("<Flow><Routine name=\"trial\">").unwrap_err();
        assert!(matches!(err, Error::Markup(_)));
    }

    #[test]
    fn test_require_child_names_parent() {
        let err = Element::new("PsychoPy2experiment").require_child("Flow").unwrap_err();
        assert_eq!(err.to_string(), "Markup element <PsychoPy2experiment> has no <Flow> child");
    }

    #[test]
    fn test_remove_attribute_keeps_order() {
        let mut element = Element::new("Settings")
            .with_attribute("name", "exp")
            .with_attribute("plugin", "none")
            .with_attribute("extra", "1");
        element.remove_attribute("plugin");
        let keys: Vec<&str> = element.attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "extra"]);
    }
}
