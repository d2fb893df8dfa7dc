//! Squid access log line parsing

use crate::error::ParseError;

/// Fewest whitespace-separated fields a native Squid log line carries.
pub const MIN_FIELDS: usize = 10;

/// Written in place of quote characters before a line reaches storage.
pub const QUOTE_PLACEHOLDER: &str = "&quot";

/// One access log line split into the fields the warehouse keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub date: String,
    pub ipaddress: String,
    pub httpstatus: String,
    pub size_in_bytes: String,
    pub method: String,
    pub site: String,
    pub login: String,
    pub mime: String,
}

/// Parses a native-format Squid log line.
///
/// Field 1 (elapsed ms) and field 8 (hierarchy/peer) are not kept.
pub fn parse_line(raw: &str) -> Result<LogLine, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let line = replace_quotes(raw);
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return Err(ParseError::MalformedLine {
            expected: MIN_FIELDS,
            found: fields.len(),
        });
    }

    Ok(LogLine {
        date: fields[0].to_string(),
        ipaddress: fields[2].to_string(),
        httpstatus: fields[3].to_string(),
        size_in_bytes: fields[4].to_string(),
        method: fields[5].to_string(),
        site: fields[6].to_string(),
        login: fields[7].to_string(),
        mime: fields[9].to_string(),
    })
}

fn replace_quotes(line: &str) -> String {
    line.replace(['\'', '"'], QUOTE_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "1600000000.123    245 192.168.1.10 TCP_MISS/200 4512 GET http://www.example.com/index.html alice HIER_DIRECT/93.184.216.34 text/html";

    #[test]
    fn maps_fields_by_position() {
        let parsed = parse_line(LINE).unwrap();
        assert_eq!(
            parsed,
            LogLine {
                date: "1600000000.123".into(),
                ipaddress: "192.168.1.10".into(),
                httpstatus: "TCP_MISS/200".into(),
                size_in_bytes: "4512".into(),
                method: "GET".into(),
                site: "http://www.example.com/index.html".into(),
                login: "alice".into(),
                mime: "text/html".into(),
            }
        );
    }

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(parse_line(""), Err(ParseError::EmptyLine));
        assert_eq!(parse_line("   \t "), Err(ParseError::EmptyLine));
    }

    #[test]
    fn short_lines_are_malformed() {
        let short = "1600000000.123 245 192.168.1.10 TCP_MISS/200 4512 GET http://a.com/ alice -";
        assert_eq!(
            parse_line(short),
            Err(ParseError::MalformedLine { expected: 10, found: 9 })
        );
        assert!(matches!(
            parse_line("garbage"),
            Err(ParseError::MalformedLine { found: 1, .. })
        ));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let parsed = parse_line(&format!("{} extra trailing", LINE)).unwrap();
        assert_eq!(parsed.mime, "text/html");
    }

    #[test]
    fn quotes_are_replaced() {
        let line = "1600000000.123 1 10.0.0.1 TCP_MISS/200 1 GET http://a.com/?q='x\" bob - text/html";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.site, "http://a.com/?q=&quotx&quot");
        assert!(!parsed.site.contains('\''));
    }
}
