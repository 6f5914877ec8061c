//! Path-keyed streaming XML parser
//!
//! Walks a document with `quick-xml` and dispatches to handlers registered
//! against the "/"-joined path of element local names from the root (for
//! example `searchRetrieveResponse/records/record`). Namespace prefixes are
//! stripped. Paths with no handler are skipped.
//!
//! A [`HandlerTable`] is built once per source and shared by reference; all
//! mutable state lives in the [`ParseState`] owned by one `parse` call.
//! Character data is collected into [`ParseState::buf`] only while
//! [`ParseState::capturing`] is set, and handlers decide when to start and
//! stop capturing.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use recon_common::{Error, Result};
use std::collections::HashMap;

/// Handler invoked when an element at a registered path starts
pub type StartHandler<R, S> = Box<dyn Fn(&mut ParseState<R, S>, &Attributes) + Send + Sync>;

/// Handler invoked when an element at a registered path ends
pub type EndHandler<R, S> = Box<dyn Fn(&mut ParseState<R, S>) + Send + Sync>;

/// Attributes of a start element, keyed by local name
#[derive(Debug, Default, Clone)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn from_element(element: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attribute in element.attributes() {
            let attribute = attribute.map_err(|e| Error::Parse(format!("bad attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| Error::Parse(format!("bad attribute value: {}", e)))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self(attributes))
    }
}

/// Mutable state of one parse
///
/// `R` is the record being built, `S` holds source-specific scratch fields.
pub struct ParseState<R, S> {
    path: Vec<String>,
    /// Character data collected while `capturing`
    pub buf: String,
    pub capturing: bool,
    /// Completed records in document order
    pub results: Vec<R>,
    /// Record currently being built
    pub current: Option<R>,
    pub scratch: S,
}

impl<R, S: Default> Default for ParseState<R, S> {
    fn default() -> Self {
        Self {
            path: Vec::new(),
            buf: String::new(),
            capturing: false,
            results: Vec::new(),
            current: None,
            scratch: S::default(),
        }
    }
}

impl<R, S> ParseState<R, S> {
    /// "/"-joined path of the element being processed
    pub fn path(&self) -> String {
        self.path.join("/")
    }

    /// Clear the buffer and start collecting character data
    pub fn start_capture(&mut self) {
        self.buf.clear();
        self.capturing = true;
    }

    /// Stop collecting and take what was collected
    pub fn take_text(&mut self) -> String {
        self.capturing = false;
        std::mem::take(&mut self.buf)
    }

    /// Move the current record (if any) onto the results
    pub fn finish_current(&mut self) {
        if let Some(record) = self.current.take() {
            self.results.push(record);
        }
    }
}

/// Immutable start/end handler registry for one document shape
pub struct HandlerTable<R, S> {
    start: HashMap<String, StartHandler<R, S>>,
    end: HashMap<String, EndHandler<R, S>>,
}

impl<R, S> Default for HandlerTable<R, S> {
    fn default() -> Self {
        Self {
            start: HashMap::new(),
            end: HashMap::new(),
        }
    }
}

impl<R, S: Default> HandlerTable<R, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a start handler for `path`
    pub fn on_start<F>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(&mut ParseState<R, S>, &Attributes) + Send + Sync + 'static,
    {
        self.start.insert(path.to_string(), Box::new(handler));
        self
    }

    /// Register an end handler for `path`
    pub fn on_end<F>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(&mut ParseState<R, S>) + Send + Sync + 'static,
    {
        self.end.insert(path.to_string(), Box::new(handler));
        self
    }

    /// Start capturing text at `path`; on end hand the text to `apply`
    pub fn capture<F>(self, path: &str, apply: F) -> Self
    where
        F: Fn(&mut ParseState<R, S>, String) + Send + Sync + 'static,
    {
        self.on_start(path, |state, _| state.start_capture())
            .on_end(path, move |state| {
                let text = state.take_text();
                apply(state, text);
            })
    }

    /// Parse a complete document and return the final state
    pub fn parse(&self, input: &[u8]) -> Result<ParseState<R, S>> {
        let mut state = ParseState::default();
        let mut reader = Reader::from_reader(input);
        let mut event_buf = Vec::new();

        loop {
            let event = reader.read_event_into(&mut event_buf).map_err(|e| {
                Error::Parse(format!(
                    "malformed XML at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Start(element) => {
                    let attributes = Attributes::from_element(&element)?;
                    self.enter(&mut state, &element, &attributes);
                }
                Event::Empty(element) => {
                    let attributes = Attributes::from_element(&element)?;
                    self.enter(&mut state, &element, &attributes);
                    self.leave(&mut state);
                }
                Event::End(_) => self.leave(&mut state),
                Event::Text(text) => {
                    if state.capturing {
                        let text = text
                            .unescape()
                            .map_err(|e| Error::Parse(format!("bad character data: {}", e)))?;
                        state.buf.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if state.capturing {
                        state.buf.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            event_buf.clear();
        }

        if !state.path.is_empty() {
            return Err(Error::Parse(format!(
                "unexpected end of document inside {}",
                state.path()
            )));
        }

        Ok(state)
    }

    /// Parse and return only the completed records
    pub fn parse_records(&self, input: &[u8]) -> Result<Vec<R>> {
        Ok(self.parse(input)?.results)
    }

    fn enter(&self, state: &mut ParseState<R, S>, element: &BytesStart<'_>, attributes: &Attributes) {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
        state.path.push(name);
        if let Some(handler) = self.start.get(&state.path()) {
            handler(state, attributes);
        }
    }

    fn leave(&self, state: &mut ParseState<R, S>) {
        if let Some(handler) = self.end.get(&state.path()) {
            handler(state);
        }
        state.path.pop();
    }
}
