//! REST document-store alert sink.
//!
//! Alerts are JSON documents in a collection addressed by URL:
//!
//! - `POST {collection}` creates a document; the store answers with its
//!   generated `name` (`.../alerts/<id>`) or `id`.
//! - `GET {collection}/{id}` reads one back, `PATCH` updates fields.
//! - `GET {collection}?limit=N[&resolved=false]` lists newest first.
//! - The connection check lives in the sibling `system` collection.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::alert::{AlertRecord, StoredAlert};
use crate::storage::AlertSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHECK_MESSAGE: &str = "Connection successful";

pub struct HttpAlertSink {
    agent: ureq::Agent,
    collection: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    name: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<StoredAlert>,
}

impl HttpAlertSink {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        let collection = super::validate_endpoint(endpoint)?;
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            agent,
            collection,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn document_url(&self, id: &str) -> Result<Url> {
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint cannot be a base URL"))?
            .push(id);
        Ok(url)
    }

    fn check_url(&self) -> Result<Url> {
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint cannot be a base URL"))?
            .pop()
            .push("system")
            .push("test");
        Ok(url)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let request = self.agent.request_url(method, url);
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

/// Map a 404 to `None`, any other failure to an error.
fn not_found_as_none(
    result: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<Option<ureq::Response>> {
    match result {
        Ok(response) => Ok(Some(response)),
        Err(ureq::Error::Status(404, _)) => Ok(None),
        Err(err) => Err(anyhow::Error::new(err)),
    }
}

fn document_id(created: CreatedDocument) -> Result<String> {
    if let Some(id) = created.id.filter(|id| !id.is_empty()) {
        return Ok(id);
    }
    created
        .name
        .as_deref()
        .and_then(|name| name.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("document store did not return a document id"))
}

impl AlertSink for HttpAlertSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn save_alert(&mut self, record: &AlertRecord) -> Result<String> {
        let created: CreatedDocument = self
            .request("POST", &self.collection)
            .send_json(serde_json::to_value(record)?)
            .with_context(|| format!("POST {}", self.collection))?
            .into_json()
            .context("decode create response")?;
        document_id(created)
    }

    fn read_alert(&mut self, id: &str) -> Result<Option<StoredAlert>> {
        let url = self.document_url(id)?;
        let Some(response) = not_found_as_none(self.request("GET", &url).call())
            .with_context(|| format!("GET {}", url))?
        else {
            return Ok(None);
        };
        let record: AlertRecord = response.into_json().context("decode alert document")?;
        Ok(Some(StoredAlert {
            id: id.to_string(),
            record,
        }))
    }

    fn list_alerts(&mut self, limit: usize, include_resolved: bool) -> Result<Vec<StoredAlert>> {
        let mut request = self
            .request("GET", &self.collection)
            .query("limit", &limit.to_string());
        if !include_resolved {
            request = request.query("resolved", "false");
        }
        let list: DocumentList = request
            .call()
            .with_context(|| format!("GET {}", self.collection))?
            .into_json()
            .context("decode alert list")?;
        Ok(list.documents.into_iter().take(limit).collect())
    }

    fn resolve_alert(&mut self, id: &str) -> Result<bool> {
        let url = self.document_url(id)?;
        let response = not_found_as_none(
            self.request("PATCH", &url)
                .send_json(serde_json::json!({ "resolved": true })),
        )
        .with_context(|| format!("PATCH {}", url))?;
        Ok(response.is_some())
    }

    fn check_connection(&mut self) -> Result<()> {
        let url = self.check_url()?;
        self.request("PUT", &url)
            .send_json(serde_json::json!({
                "message": CHECK_MESSAGE,
                "timestamp": crate::now_s()?,
            }))
            .with_context(|| format!("PUT {}", url))?;
        let stored: serde_json::Value = self
            .request("GET", &url)
            .call()
            .with_context(|| format!("GET {}", url))?
            .into_json()
            .context("decode connection-check document")?;
        match stored.get("message").and_then(|m| m.as_str()) {
            Some(CHECK_MESSAGE) => Ok(()),
            other => Err(anyhow!("connection-check document mismatch: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    struct SeenRequest {
        method: String,
        target: String,
        authorization: Option<String>,
    }

    /// Local document store that answers `requests` calls, one per connection,
    /// and returns what it saw. Collection URL is `{base}/alerts`.
    fn spawn_document_store(requests: usize) -> (String, JoinHandle<Vec<SeenRequest>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind store");
        let base = format!("http://{}/v1", listener.local_addr().expect("store addr"));
        let handle = thread::spawn(move || {
            let mut store = DocumentStore::default();
            let mut seen = Vec::new();
            for _ in 0..requests {
                let (mut stream, _) = listener.accept().expect("accept");
                let (request, body) = read_request(&stream);
                let (status, reply) = store.handle(&request.method, &request.target, body);
                write_response(&mut stream, status, &reply);
                seen.push(request);
            }
            seen
        });
        (base, handle)
    }

    #[derive(Default)]
    struct DocumentStore {
        alerts: Vec<(String, Value)>,
        system: Option<Value>,
    }

    impl DocumentStore {
        fn handle(&mut self, method: &str, target: &str, body: Value) -> (u16, Value) {
            let (path, query) = target.split_once('?').unwrap_or((target, ""));
            match (method, path) {
                ("POST", "/v1/alerts") => {
                    let id = format!("a{}", self.alerts.len() + 1);
                    self.alerts.push((id.clone(), body));
                    (200, json!({ "name": format!("projects/p/documents/alerts/{}", id) }))
                }
                ("GET", "/v1/alerts") => (200, self.list(query)),
                ("PUT", "/v1/system/test") => {
                    self.system = Some(body.clone());
                    (200, body)
                }
                ("GET", "/v1/system/test") => match &self.system {
                    Some(doc) => (200, doc.clone()),
                    None => (404, json!({})),
                },
                (_, path) => {
                    let Some(id) = path.strip_prefix("/v1/alerts/") else {
                        return (400, json!({ "error": "unknown collection" }));
                    };
                    let Some((_, doc)) = self.alerts.iter_mut().find(|(key, _)| key == id) else {
                        return (404, json!({ "error": "not found" }));
                    };
                    if method == "PATCH" {
                        if let (Some(doc), Some(patch)) = (doc.as_object_mut(), body.as_object()) {
                            doc.extend(patch.clone());
                        }
                    }
                    (200, doc.clone())
                }
            }
        }

        fn list(&self, query: &str) -> Value {
            let mut limit = usize::MAX;
            let mut open_only = false;
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("limit", n)) => limit = n.parse().expect("numeric limit"),
                    Some(("resolved", "false")) => open_only = true,
                    _ => {}
                }
            }
            let documents: Vec<Value> = self
                .alerts
                .iter()
                .rev()
                .filter(|(_, doc)| !open_only || doc["resolved"] != json!(true))
                .take(limit)
                .map(|(id, doc)| {
                    let mut doc = doc.clone();
                    doc["id"] = json!(id);
                    doc
                })
                .collect();
            json!({ "documents": documents })
        }
    }

    fn read_request(stream: &TcpStream) -> (SeenRequest, Value) {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).expect("request line");
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0;
        let mut authorization = None;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).expect("header line");
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                match name.to_ascii_lowercase().as_str() {
                    "content-length" => content_length = value.trim().parse().expect("length"),
                    "authorization" => authorization = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("request body");
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("json body")
        };
        let request = SeenRequest {
            method,
            target,
            authorization,
        };
        (request, body)
    }

    fn write_response(stream: &mut TcpStream, status: u16, body: &Value) {
        let body = body.to_string();
        let reason = match status {
            200 => "OK",
            404 => "Not Found",
            _ => "Bad Request",
        };
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).expect("write response");
    }

    fn record(count: usize, id: u64) -> AlertRecord {
        AlertRecord {
            timestamp: 1_700_000_000 + id,
            cattle_count: count,
            cattle_id: Some(id),
            boundary_crossed: true,
            camera: "North Gate".to_string(),
            resolved: false,
        }
    }

    #[test]
    fn alerts_round_trip_through_document_store() -> Result<()> {
        let (base, store) = spawn_document_store(10);
        let mut sink = HttpAlertSink::new(&format!("{}/alerts/", base), Some("s3cret".to_string()))?;

        sink.check_connection()?;
        let first = sink.save_alert(&record(2, 7))?;
        let second = sink.save_alert(&record(3, 9))?;
        assert_eq!((first.as_str(), second.as_str()), ("a1", "a2"));

        let stored = sink.read_alert(&first)?.expect("first alert stored");
        assert_eq!(stored.record, record(2, 7));
        assert!(sink.read_alert("missing")?.is_none());

        assert!(sink.resolve_alert(&first)?);
        assert!(!sink.resolve_alert("missing")?);

        let open = sink.list_alerts(10, false)?;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "a2");

        let all = sink.list_alerts(10, true)?;
        let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["a2", "a1"]);
        assert!(all[1].record.resolved);

        let seen = store.join().expect("store thread");
        let methods: Vec<&str> = seen.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(
            methods,
            ["PUT", "GET", "POST", "POST", "GET", "GET", "PATCH", "PATCH", "GET", "GET"]
        );
        assert_eq!(seen[0].target, "/v1/system/test");
        assert_eq!(seen[8].target, "/v1/alerts?limit=10&resolved=false");
        assert!(seen
            .iter()
            .all(|r| r.authorization.as_deref() == Some("Bearer s3cret")));
        Ok(())
    }

    #[test]
    fn store_errors_surface_on_save() -> Result<()> {
        let (base, store) = spawn_document_store(1);
        let mut sink = HttpAlertSink::new(&format!("{}/archive", base), None)?;
        let err = sink.save_alert(&record(1, 1)).expect_err("unknown collection");
        assert!(err.to_string().contains("POST"));

        let seen = store.join().expect("store thread");
        assert_eq!(seen[0].target, "/v1/archive");
        assert!(seen[0].authorization.is_none());
        Ok(())
    }

    #[test]
    fn ids_come_from_id_or_document_name() -> Result<()> {
        let by_id = CreatedDocument {
            name: None,
            id: Some("abc".to_string()),
        };
        assert_eq!(document_id(by_id)?, "abc");

        let by_name = CreatedDocument {
            name: Some("projects/p/databases/d/documents/alerts/Xy12".to_string()),
            id: None,
        };
        assert_eq!(document_id(by_name)?, "Xy12");

        let neither = CreatedDocument {
            name: None,
            id: None,
        };
        assert!(document_id(neither).is_err());
        Ok(())
    }

    #[test]
    fn check_document_lives_next_to_the_collection() -> Result<()> {
        let sink = HttpAlertSink::new("https://store.example/v1/alerts/", None)?;
        assert_eq!(
            sink.check_url()?.as_str(),
            "https://store.example/v1/system/test"
        );
        assert_eq!(
            sink.document_url("abc")?.as_str(),
            "https://store.example/v1/alerts/abc"
        );
        Ok(())
    }
}
