//! Small XML/URL string helpers shared by the SOAP transport and DIDL-Lite
//! metadata formatter.

/// Escapes the five reserved XML characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Builds a `http://<ip>:1400<path>` control URL. Sonos speakers always serve
/// their UPnP control endpoints on port 1400.
pub fn build_sonos_url(ip: &str, path: &str) -> String {
    format!("http://{ip}:1400{path}")
}

/// Extracts the text content of the first `<tag>...</tag>` occurrence.
/// Good enough for the flat, single-level SOAP response bodies Sonos/DLNA
/// renderers return; nested or repeated tags need a real XML reader.
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(unescape_xml(&xml[start..end]))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_xml_covers_reserved_characters() {
        assert_eq!(escape_xml("<a & \"b\" 'c'>"), "&lt;a &amp; &quot;b&quot; &apos;c&apos;&gt;");
    }

    #[test]
    fn extract_xml_text_finds_flat_tag() {
        let xml = "<Envelope><CurrentVolume>42</CurrentVolume></Envelope>";
        assert_eq!(extract_xml_text(xml, "CurrentVolume").as_deref(), Some("42"));
    }

    #[test]
    fn extract_xml_text_missing_tag_is_none() {
        assert_eq!(extract_xml_text("<a></a>", "b"), None);
    }

    #[test]
    fn build_sonos_url_uses_port_1400() {
        assert_eq!(build_sonos_url("10.0.0.5", "/Foo"), "http://10.0.0.5:1400/Foo");
    }
}
