use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Flattened XML event. Element and attribute names keep their namespace prefix
/// (`w:p`, `w15:paraId`); use [`local_name`] to compare across generators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlEvent {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
}

impl XmlEvent {
    /// Name and attributes for both `<x ...>` and `<x .../>`.
    pub fn open_tag(&self) -> Option<(&str, &[(String, String)])> {
        match self {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
                Some((name.as_str(), attrs.as_slice()))
            }
            _ => None,
        }
    }

    pub fn is_open(&self, local: &str) -> bool {
        self.open_tag()
            .map(|(name, _)| local_name(name) == local)
            .unwrap_or(false)
    }
}

/// One parsed part of the package, in document order.
#[derive(Clone, Debug)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> anyhow::Result<XmlPart> {
    let xml_bytes = xml_bytes.strip_prefix(UTF8_BOM).unwrap_or(xml_bytes);
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("read xml event at byte {}", reader.buffer_position()))?;
        match ev {
            Event::Eof => break,
            Event::Start(s) => {
                depth += 1;
                events.push(XmlEvent::Start {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                events.push(XmlEvent::End {
                    name: bytes_to_string(e.name().as_ref()),
                });
            }
            Event::Empty(s) => {
                events.push(XmlEvent::Empty {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::Text(t) => {
                let text = t.unescape().context("unescape text")?.into_owned();
                push_text(&mut events, text);
            }
            Event::CData(t) => {
                push_text(&mut events, bytes_to_string(t.into_inner()));
            }
            // Declarations, comments, PIs and doctypes carry nothing we read.
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }
    if depth != 0 {
        anyhow::bail!("unexpected end of document: {depth} element(s) left open");
    }

    Ok(XmlPart {
        name: name.to_string(),
        events,
    })
}

fn push_text(events: &mut Vec<XmlEvent>, text: String) {
    if text.is_empty() {
        return;
    }
    // Adjacent text and CDATA chunks belong to the same node.
    if let Some(XmlEvent::Text { text: prev }) = events.last_mut() {
        prev.push_str(&text);
        return;
    }
    events.push(XmlEvent::Text { text });
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        let key = bytes_to_string(a.key.as_ref());
        let val = a.unescape_value().context("unescape attr")?.into_owned();
        attrs.push((key, val));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

/// `w15:paraId` -> `paraId`.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

/// First attribute whose qualified name is one of `names`, in the order given.
pub fn find_attr<'a>(attrs: &'a [(String, String)], names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|want| {
        attrs
            .iter()
            .find(|(k, _)| k == want)
            .map(|(_, v)| v.as_str())
    })
}

/// First attribute with the given local name, whatever its prefix.
pub fn find_attr_local<'a>(attrs: &'a [(String, String)], local: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| local_name(k) == local)
        .map(|(_, v)| v.as_str())
}

/// Qualified names first, then any prefix carrying the same local name.
pub fn find_attr_any<'a>(
    attrs: &'a [(String, String)],
    names: &[&str],
    local: &str,
) -> Option<&'a str> {
    find_attr(attrs, names).or_else(|| find_attr_local(attrs, local))
}
