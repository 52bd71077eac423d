//! Query, header and JSON marshaling for request building.
//!
//! Structs are flattened through `serde_json::Value`, so field names follow
//! `#[serde(rename = "...")]` and optional fields are skipped when `None`.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Serialize a flat struct into an `application/x-www-form-urlencoded` query.
///
/// Zero values (`None`, `""`, `false`, `0`, empty sequences) are omitted,
/// pairs are sorted by key and sequences repeat their key once per element.
/// `*` and `~` stay literal.
pub fn marshal_query<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut pairs = flatten(value, Error::QueryEncode)?;
    pairs.retain(|(_, v)| !is_zero(v));
    // Stable sort keeps sequence order within a key.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, &scalar_to_string(value));
    }
    // `%` itself encodes as `%25`, so `%7E` can only come from `~`.
    Ok(serializer.finish().replace("%7E", "~"))
}

/// Serialize a flat struct into request headers.
///
/// Field names become header names; `None` fields are skipped and sequences
/// produce one header line per element.
pub fn marshal_headers<T: Serialize + ?Sized>(value: &T) -> Result<HeaderMap> {
    let pairs = flatten(value, Error::HeaderEncode)?;
    let mut headers = HeaderMap::new();
    for (key, value) in pairs {
        if value.is_null() {
            continue;
        }
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| Error::InvalidHeader(format!("{}: {}", key, e)))?;
        let value = HeaderValue::from_str(&scalar_to_string(&value))
            .map_err(|e| Error::InvalidHeader(format!("{}: {}", key, e)))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Deserialize headers into a struct.
///
/// Header names are canonicalized (`content-type` -> `Content-Type`) before
/// matching field names, and only the first value of a repeated header is
/// used. Values parse into strings, integers, floats and booleans.
///
/// A missing header is an error for a plain field. Use `Option<_>` or
/// `#[serde(default)]` for headers that may be absent.
pub fn unmarshal_headers<T: DeserializeOwned>(headers: &HeaderMap) -> Result<T> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for name in headers.keys() {
        if let Some(value) = headers.get(name) {
            let value = String::from_utf8_lossy(value.as_bytes());
            serializer.append_pair(&canonical_header_name(name.as_str()), &value);
        }
    }
    let encoded = serializer.finish();
    serde_urlencoded::from_str(&encoded).map_err(|e| Error::HeaderDecode(e.to_string()))
}

/// Serialize to compact JSON followed by a newline, without HTML escaping.
pub fn marshal_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string(value)?;
    out.push('\n');
    Ok(out)
}

/// Canonical MIME header form: first letter and each letter after `-` upper-cased.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Flatten a struct into `(field, scalar)` pairs, expanding sequences.
fn flatten<T: Serialize + ?Sized>(
    value: &T,
    err: fn(String) -> Error,
) -> Result<Vec<(String, Value)>> {
    let object = match serde_json::to_value(value).map_err(|e| err(e.to_string()))? {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        other => return Err(err(format!("expected a struct or map, got {}", kind(&other)))),
    };

    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        match value {
            Value::Array(items) => {
                for item in items {
                    if item.is_array() || item.is_object() {
                        return Err(err(format!("field {} holds a nested {}", key, kind(&item))));
                    }
                    pairs.push((key.clone(), item));
                }
            }
            Value::Object(_) => {
                return Err(err(format!("field {} holds a nested object", key)));
            }
            scalar => pairs.push((key, scalar)),
        }
    }
    Ok(pairs)
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize)]
    struct Search<'a> {
        q: &'a str,
        page: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        lang: Option<&'a str>,
        tags: Vec<&'a str>,
        exact: bool,
        empty: &'a str,
    }

    #[test]
    fn test_query_sorted_and_zero_values_omitted() {
        let q = Search {
            q: "rust lang",
            page: 0,
            lang: None,
            tags: vec!["b", "a"],
            exact: true,
            empty: "",
        };
        assert_eq!(marshal_query(&q).unwrap(), "exact=true&q=rust+lang&tags=b&tags=a");
    }

    #[test]
    fn test_query_keeps_star_literal() {
        #[derive(Serialize)]
        struct Glob {
            pattern: &'static str,
        }
        assert_eq!(marshal_query(&Glob { pattern: "a*b&c" }).unwrap(), "pattern=a*b%26c");
    }

    #[test]
    fn test_query_keeps_tilde_literal() {
        #[derive(Serialize)]
        struct Path {
            home: &'static str,
        }
        assert_eq!(marshal_query(&Path { home: "~user/%7E" }).unwrap(), "home=~user%2F%257E");
    }

    #[test]
    fn test_query_rejects_nested_struct() {
        #[derive(Serialize)]
        struct Inner {
            x: u8,
        }
        #[derive(Serialize)]
        struct Outer {
            inner: Inner,
        }
        let err = marshal_query(&Outer { inner: Inner { x: 1 } }).unwrap_err();
        assert!(matches!(err, Error::QueryEncode(_)));
    }

    #[test]
    fn test_query_rejects_scalar() {
        assert!(matches!(marshal_query(&5u8), Err(Error::QueryEncode(_))));
    }

    #[test]
    fn test_marshal_headers() {
        #[derive(Serialize)]
        struct Auth {
            #[serde(rename = "Authorization")]
            authorization: String,
            #[serde(rename = "X-Retry")]
            retry: u8,
            #[serde(rename = "X-Trace")]
            trace: Option<String>,
            #[serde(rename = "Accept")]
            accept: Vec<&'static str>,
        }
        let headers = marshal_headers(&Auth {
            authorization: "Bearer t".into(),
            retry: 3,
            trace: None,
            accept: vec!["text/html", "application/json"],
        })
        .unwrap();

        assert_eq!(headers["authorization"], "Bearer t");
        assert_eq!(headers["x-retry"], "3");
        assert!(!headers.contains_key("x-trace"));
        let accept: Vec<_> = headers.get_all("accept").iter().collect();
        assert_eq!(accept, ["text/html", "application/json"]);
    }

    #[test]
    fn test_marshal_headers_rejects_bad_value() {
        #[derive(Serialize)]
        struct Bad {
            #[serde(rename = "X-Bad")]
            bad: &'static str,
        }
        let err = marshal_headers(&Bad { bad: "line\nbreak" }).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_unmarshal_headers() {
        #[derive(Deserialize, Debug)]
        struct Meta {
            #[serde(rename = "Content-Type")]
            content_type: String,
            #[serde(rename = "Content-Length")]
            content_length: u64,
            #[serde(rename = "X-Missing")]
            missing: Option<String>,
        }
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("content-length", HeaderValue::from_static("42"));

        let meta: Meta = unmarshal_headers(&headers).unwrap();
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.content_length, 42);
        assert!(meta.missing.is_none());
    }

    #[test]
    fn test_unmarshal_headers_missing_field() {
        #[derive(Deserialize, Debug)]
        struct Strict {
            #[serde(rename = "X-Count")]
            _count: u32,
        }
        #[derive(Deserialize, Debug)]
        struct Lenient {
            #[serde(rename = "X-Count", default)]
            count: u32,
            #[serde(rename = "X-Name", default)]
            name: String,
        }
        let headers = HeaderMap::new();
        assert!(matches!(
            unmarshal_headers::<Strict>(&headers),
            Err(Error::HeaderDecode(_))
        ));
        let lenient: Lenient = unmarshal_headers(&headers).unwrap();
        assert_eq!(lenient.count, 0);
        assert!(lenient.name.is_empty());
    }

    #[test]
    fn test_unmarshal_headers_first_value_wins() {
        #[derive(Deserialize)]
        struct Cookies {
            #[serde(rename = "Set-Cookie")]
            set_cookie: String,
        }
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        let cookies: Cookies = unmarshal_headers(&headers).unwrap();
        assert_eq!(cookies.set_cookie, "a=1");
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-ABC-def"), "X-Abc-Def");
        assert_eq!(canonical_header_name("etag"), "Etag");
    }

    #[test]
    fn test_marshal_json_no_html_escape() {
        #[derive(Serialize)]
        struct Doc {
            html: &'static str,
        }
        assert_eq!(marshal_json(&Doc { html: "<a>&</a>" }).unwrap(), "{\"html\":\"<a>&</a>\"}\n");
    }
}
