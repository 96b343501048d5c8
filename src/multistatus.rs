//! WebDAV multistatus generation.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

/// One described resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Encoded href, relative to the server root.
    pub href: String,
    /// Display name (last path segment).
    pub display_name: String,
    /// Last-modified time in milliseconds since the epoch.
    pub modified_ms: i64,
    /// Size in bytes (0 for directories).
    pub content_length: u64,
    /// Whether the resource is a collection.
    pub is_collection: bool,
}

/// Multistatus document builder.
#[derive(Debug, Default)]
pub struct MultistatusBuilder {
    resources: Vec<Resource>,
}

impl MultistatusBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource.
    pub fn resource(&mut self, resource: Resource) -> &mut Self {
        self.resources.push(resource);
        self
    }

    /// Build the XML document.
    pub fn build(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        // Writing to Vec can't fail
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));

        let mut root = BytesStart::new("d:multistatus");
        root.push_attribute(("xmlns:d", "DAV:"));
        let _ = writer.write_event(Event::Start(root));

        for resource in &self.resources {
            write_response(&mut writer, resource);
        }

        let _ = writer.write_event(Event::End(BytesEnd::new("d:multistatus")));

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

/// Write a simple text element.
fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
    let _ = writer.write_event(Event::Text(BytesText::new(text)));
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

fn start<W: std::io::Write>(writer: &mut Writer<W>, name: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
}

fn end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) {
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

/// Write one `<d:response>` element.
fn write_response<W: std::io::Write>(writer: &mut Writer<W>, resource: &Resource) {
    start(writer, "d:response");
    write_text_element(writer, "d:href", &resource.href);

    start(writer, "d:propstat");
    start(writer, "d:prop");
    write_text_element(writer, "d:displayname", &resource.display_name);
    // Raw milliseconds, as the syncing readers expect
    write_text_element(writer, "d:creationdate", &resource.modified_ms.to_string());
    write_text_element(
        writer,
        "d:getcontentlength",
        &resource.content_length.to_string(),
    );
    if resource.is_collection {
        start(writer, "d:resourcetype");
        let _ = writer.write_event(Event::Empty(BytesStart::new("d:collection")));
        end(writer, "d:resourcetype");
    } else {
        let _ = writer.write_event(Event::Empty(BytesStart::new("d:resourcetype")));
    }
    end(writer, "d:prop");
    write_text_element(writer, "d:status", "HTTP/1.1 200 OK");
    end(writer, "d:propstat");

    end(writer, "d:response");
}
