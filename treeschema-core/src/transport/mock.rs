//! In-memory catalog implementing the Tree Schema REST surface.
//!
//! Every request is recorded so tests can assert exactly which reads and writes
//! a high-level operation issued. The mock can also be scripted to fail the next
//! request, to simulate a concurrent creator winning a natural-key race, and to
//! walk manifest-processing jobs through a fixed sequence of states.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::http::map_http_error;
use super::{ApiRequest, Method, Transport, Upload};
use crate::error::{ApiError, Result};

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

struct ManifestJob {
    polls: usize,
}

struct MockState {
    next_id: i64,
    tables: BTreeMap<String, BTreeMap<i64, Value>>,
    requests: Vec<RecordedRequest>,
    races: Vec<String>,
    failures: VecDeque<(u16, String)>,
    lost_replies: usize,
    jobs: BTreeMap<i64, ManifestJob>,
    status_script: Vec<String>,
    results: Value,
}

/// In-memory stand-in for the Tree Schema server.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

type Reply = std::result::Result<Value, (u16, String)>;

fn reject(status: u16, message: impl Into<String>) -> Reply {
    Err((status, json!({ "message": message.into() }).to_string()))
}

/// Natural-key attribute of the collection at `path`, if it has one.
fn key_field(path: &str) -> Option<&'static str> {
    match path.rsplit('/').next().unwrap_or_default() {
        "users" => Some("email"),
        "values" => Some("field_value"),
        "links" => None,
        _ => Some("name"),
    }
}

fn is_taggable(path: &str) -> bool {
    matches!(
        path.rsplit('/').next().unwrap_or_default(),
        "data-stores" | "schemas" | "fields" | "transformations"
    )
}

fn is_active(record: &Value) -> bool {
    !record["deprecated"].as_bool().unwrap_or(false)
}

impl MockTransport {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                tables: BTreeMap::new(),
                requests: Vec::new(),
                races: Vec::new(),
                failures: VecDeque::new(),
                lost_replies: 0,
                jobs: BTreeMap::new(),
                status_script: vec!["running".to_string(), "complete".to_string()],
                results: json!({ "schemas": [], "lineage": [] }),
            }),
        }
    }

    /// Insert a record directly, bypassing validation and the request log.
    pub fn seed(&self, collection: &str, record: Value) -> i64 {
        let mut state = self.lock();
        state.insert(collection, record)
    }

    pub fn seed_user(&self, email: &str) -> i64 {
        self.seed("users", json!({ "email": email }))
    }

    /// Current server-side copy of a record.
    pub fn record(&self, collection: &str, id: i64) -> Option<Value> {
        let state = self.lock();
        state.tables.get(collection)?.get(&id).cloned()
    }

    /// All records of a collection, including deprecated ones.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        let state = self.lock();
        state
            .tables
            .get(collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    /// Number of recorded requests with the given verb and exact path.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Number of recorded requests that change server state.
    pub fn write_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method.is_write())
            .count()
    }

    /// Fail the next request with the given HTTP status and body.
    pub fn fail_next(&self, status: u16, body: &str) {
        self.lock()
            .failures
            .push_back((status, body.to_string()));
    }

    /// Apply the next request, then answer it with a client-side timeout as
    /// if the response had been lost on the way back.
    pub fn lose_next_reply(&self) {
        self.lock().lost_replies += 1;
    }

    /// Make the next create in a collection named `collection` (last path
    /// segment, e.g. `"schemas"`) lose a race: the record is stored as if another
    /// client created it first, and the request is answered with 409.
    pub fn race_next_create(&self, collection: &str) {
        self.lock()
            .races
            .push(collection.to_string());
    }

    /// Statuses reported by successive manifest polls; the last one repeats.
    pub fn set_manifest_statuses(&self, statuses: &[&str]) {
        let mut state = self.lock();
        state.status_script = statuses.iter().map(|s| s.to_string()).collect();
    }

    /// Metadata returned for any completed manifest job.
    pub fn set_manifest_results(&self, results: Value) {
        self.lock().results = results;
    }
}

impl MockState {
    fn take_lost_reply(&mut self) -> bool {
        let lost = self.lost_replies > 0;
        self.lost_replies = self.lost_replies.saturating_sub(1);
        lost
    }

    fn insert(&mut self, collection: &str, record: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let mut obj = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        obj.insert("id".to_string(), json!(id));
        obj.entry("deprecated").or_insert(json!(false));
        if is_taggable(collection) {
            obj.entry("tags").or_insert(json!([]));
        }
        self.tables
            .entry(collection.to_string())
            .or_default()
            .insert(id, Value::Object(obj));
        id
    }

    fn key_taken(&self, collection: &str, key: &str, value: &str, except: Option<i64>) -> bool {
        self.tables.get(collection).is_some_and(|t| {
            t.iter().any(|(id, r)| {
                Some(*id) != except && is_active(r) && r[key].as_str() == Some(value)
            })
        })
    }

    fn field_exists(&self, id: i64) -> bool {
        self.tables
            .iter()
            .filter(|(path, _)| path.ends_with("/fields"))
            .any(|(_, t)| t.get(&id).is_some_and(is_active))
    }

    fn route(&mut self, req: &ApiRequest) -> Reply {
        let path = req.path.trim_matches('/').to_string();
        let segs: Vec<&str> = path.split('/').collect();

        if segs.contains(&"dbt-manifest") {
            return self.manifest_status(&segs);
        }

        let last = segs.last().copied().unwrap_or_default();
        if last == "tags" && segs.len() >= 3 {
            if let Ok(id) = segs[segs.len() - 2].parse::<i64>() {
                let collection = segs[..segs.len() - 2].join("/");
                return self.add_tags(&collection, id, req.body.as_ref());
            }
        }

        if let Ok(id) = last.parse::<i64>() {
            let collection = segs[..segs.len() - 1].join("/");
            return match req.method {
                Method::Get => self.get_record(&collection, id),
                Method::Put => self.update(&collection, id, req.body.as_ref()),
                _ => reject(405, "method not allowed"),
            };
        }

        match req.method {
            Method::Get => self.list(&path, req),
            Method::Post if last == "links" => self.create_links(&path, req.body.as_ref()),
            Method::Post => self.create(&path, req.body.as_ref()),
            Method::Delete => self.deprecate(&path, req.body.as_ref()),
            Method::Put => reject(405, "method not allowed"),
        }
    }

    fn get_record(&self, collection: &str, id: i64) -> Reply {
        match self.tables.get(collection).and_then(|t| t.get(&id)) {
            Some(record) => Ok(record.clone()),
            None => reject(404, format!("{}/{} not found", collection, id)),
        }
    }

    fn list(&self, collection: &str, req: &ApiRequest) -> Reply {
        let mut rows: Vec<Value> = self
            .tables
            .get(collection)
            .map(|t| t.values().filter(|r| is_active(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(key) = key_field(collection) {
            if let Some(wanted) = req.query_value(key) {
                rows.retain(|r| r[key].as_str() == Some(wanted));
            }
        }

        let page = req
            .query_value("page")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let page_size = req
            .query_value("page_size")
            .and_then(|p| p.parse::<usize>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(100);
        let start = (page - 1) * page_size;
        let data: Vec<Value> = rows.iter().skip(start).take(page_size).cloned().collect();
        let next_page = if start + page_size < rows.len() {
            json!(page + 1)
        } else {
            Value::Null
        };
        Ok(json!({ "data": data, "next_page": next_page }))
    }

    fn create(&mut self, collection: &str, body: Option<&Value>) -> Reply {
        let Some(Value::Object(fields)) = body else {
            return reject(400, "request body must be an object");
        };
        if let Some(key) = key_field(collection) {
            let Some(value) = fields.get(key).and_then(Value::as_str).filter(|v| !v.is_empty())
            else {
                return reject(422, format!("{} is required", key));
            };
            let name = collection.rsplit('/').next().unwrap_or_default().to_string();
            if let Some(pos) = self.races.iter().position(|r| *r == name) {
                self.races.remove(pos);
                self.insert(collection, Value::Object(fields.clone()));
                return reject(409, format!("{} '{}' already exists", key, value));
            }
            if self.key_taken(collection, key, value, None) {
                return reject(409, format!("{} '{}' already exists", key, value));
            }
        }
        let id = self.insert(collection, Value::Object(fields.clone()));
        self.get_record(collection, id)
    }

    fn update(&mut self, collection: &str, id: i64, body: Option<&Value>) -> Reply {
        let Some(Value::Object(changes)) = body else {
            return reject(400, "request body must be an object");
        };
        if let Some(key) = key_field(collection) {
            if let Some(value) = changes.get(key).and_then(Value::as_str) {
                if self.key_taken(collection, key, value, Some(id)) {
                    return reject(409, format!("{} '{}' already exists", key, value));
                }
            }
        }
        let Some(Value::Object(record)) =
            self.tables.get_mut(collection).and_then(|t| t.get_mut(&id))
        else {
            return reject(404, format!("{}/{} not found", collection, id));
        };
        for (k, v) in changes {
            if k != "id" {
                record.insert(k.clone(), v.clone());
            }
        }
        self.get_record(collection, id)
    }

    fn add_tags(&mut self, collection: &str, id: i64, body: Option<&Value>) -> Reply {
        let incoming: Vec<String> = body
            .and_then(|b| b["tags"].as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let Some(record) = self.tables.get_mut(collection).and_then(|t| t.get_mut(&id)) else {
            return reject(404, format!("{}/{} not found", collection, id));
        };
        let mut tags: Vec<String> = record["tags"]
            .as_array()
            .map(|a| a.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        for tag in incoming {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        record["tags"] = json!(tags);
        Ok(json!({ "tags": tags }))
    }

    fn deprecate(&mut self, collection: &str, body: Option<&Value>) -> Reply {
        let ids: Vec<i64> = body
            .and_then(|b| b["ids"].as_array())
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        let Some(table) = self.tables.get_mut(collection) else {
            return reject(404, format!("{} not found", collection));
        };
        if let Some(missing) = ids.iter().find(|id| !table.contains_key(id)) {
            return reject(404, format!("{}/{} not found", collection, missing));
        }
        for id in &ids {
            if let Some(record) = table.get_mut(id) {
                record["deprecated"] = json!(true);
            }
        }
        Ok(json!({ "deprecated": ids }))
    }

    fn create_links(&mut self, collection: &str, body: Option<&Value>) -> Reply {
        let Some(specs) = body.and_then(|b| b["links"].as_array()).cloned() else {
            return reject(400, "links array is required");
        };
        let transformation_id = collection
            .split('/')
            .nth(1)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or_default();

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for spec in specs {
            let source = spec["source_field_id"].as_i64().unwrap_or_default();
            let target = spec["target_field_id"].as_i64().unwrap_or_default();
            let failure = if !self.field_exists(source) {
                Some(format!("source field {} does not exist", source))
            } else if !self.field_exists(target) {
                Some(format!("target field {} does not exist", target))
            } else if self.tables.get(collection).is_some_and(|t| {
                t.values().any(|r| {
                    is_active(r)
                        && r["source_field_id"].as_i64() == Some(source)
                        && r["target_field_id"].as_i64() == Some(target)
                })
            }) {
                Some("link already exists".to_string())
            } else {
                None
            };

            match failure {
                Some(message) => errors.push(json!({
                    "source_field_id": source,
                    "target_field_id": target,
                    "message": message,
                })),
                None => {
                    let id = self.insert(
                        collection,
                        json!({
                            "source_field_id": source,
                            "target_field_id": target,
                            "transformation_id": transformation_id,
                        }),
                    );
                    if let Ok(record) = self.get_record(collection, id) {
                        created.push(record);
                    }
                }
            }
        }
        Ok(json!({ "links": created, "errors": errors }))
    }

    fn manifest_status(&mut self, segs: &[&str]) -> Reply {
        // data-stores/{ds}/dbt-manifest/{pid}[/results]
        let Some(pid) = segs.get(3).and_then(|s| s.parse::<i64>().ok()) else {
            return reject(404, "manifest process not found");
        };
        let script = self.status_script.clone();
        let results = self.results.clone();
        let Some(job) = self.jobs.get_mut(&pid) else {
            return reject(404, format!("manifest process {} not found", pid));
        };
        if segs.get(4) == Some(&"results") {
            return Ok(results);
        }
        let idx = job.polls.min(script.len().saturating_sub(1));
        job.polls += 1;
        let status = script.get(idx).cloned().unwrap_or_else(|| "complete".to_string());
        let message = if status == "failed" {
            json!("manifest could not be parsed")
        } else {
            Value::Null
        };
        Ok(json!({
            "process_id": pid,
            "status": status,
            "message": message,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        }))
    }

    fn submit_manifest(&mut self, upload: &Upload) -> Reply {
        if serde_json::from_slice::<Value>(&upload.content).is_err() {
            return reject(400, "manifest is not valid JSON");
        }
        let pid = self.next_id;
        self.next_id += 1;
        self.jobs.insert(pid, ManifestJob { polls: 0 });
        Ok(json!({ "process_id": pid, "status": "submitted" }))
    }
}

fn into_result(reply: Reply, path: &str, lost: bool) -> Result<Value> {
    if lost {
        return Err(ApiError::Timeout { timeout_secs: 0 }.into());
    }
    reply.map_err(|(status, body)| {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        map_http_error(status, &body, path, "mock", Some(0))
    })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
        });
        let reply = match state.failures.pop_front() {
            Some(failure) => Err(failure),
            None => state.route(&request),
        };
        into_result(reply, &request.path, state.take_lost_reply())
    }

    async fn upload(&self, upload: Upload) -> Result<Value> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: Method::Post,
            path: upload.path.clone(),
            query: Vec::new(),
            body: Some(json!({
                "file_name": upload.file_name,
                "bytes": upload.content.len(),
            })),
        });
        let reply = match state.failures.pop_front() {
            Some(failure) => Err(failure),
            None => state.submit_manifest(&upload),
        };
        into_result(reply, &upload.path, state.take_lost_reply())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeSchemaError;

    #[tokio::test]
    async fn test_create_then_search_by_key() {
        let mock = MockTransport::new();
        let created = mock
            .send(ApiRequest::post(
                "data-stores",
                json!({ "name": "Kafka", "type": "kafka" }),
            ))
            .await
            .unwrap();
        assert_eq!(created["name"], "Kafka");
        assert_eq!(created["tags"], json!([]));

        let found = mock
            .send(ApiRequest::get("data-stores").query("name", "Kafka"))
            .await
            .unwrap();
        assert_eq!(found["data"][0]["id"], created["id"]);
        assert_eq!(found["next_page"], Value::Null);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let mock = MockTransport::new();
        let body = json!({ "name": "Kafka", "type": "kafka" });
        mock.send(ApiRequest::post("data-stores", body.clone()))
            .await
            .unwrap();
        let err = mock
            .send(ApiRequest::post("data-stores", body))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let mock = MockTransport::new();
        let err = mock.send(ApiRequest::get("users/42")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pagination() {
        let mock = MockTransport::new();
        for i in 0..5 {
            mock.seed_user(&format!("u{i}@example.com"));
        }
        let page = mock
            .send(ApiRequest::get("users").query("page", 2).query("page_size", 2))
            .await
            .unwrap();
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        assert_eq!(page["data"][0]["email"], "u2@example.com");
        assert_eq!(page["next_page"], 3);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed_once() {
        let mock = MockTransport::new();
        mock.fail_next(503, "maintenance");
        let err = mock.send(ApiRequest::get("users")).await.unwrap_err();
        assert!(matches!(err, TreeSchemaError::Api(_)));
        assert!(mock.send(ApiRequest::get("users")).await.is_ok());
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_lost_reply_still_applies_the_write() {
        let mock = MockTransport::new();
        mock.lose_next_reply();
        let err = mock
            .send(ApiRequest::post(
                "data-stores",
                json!({ "name": "Kafka", "type": "kafka" }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeSchemaError::Api(ApiError::Timeout { .. })));
        let found = mock
            .send(ApiRequest::get("data-stores").query("name", "Kafka"))
            .await
            .unwrap();
        assert_eq!(found["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deprecated_records_hidden_from_search() {
        let mock = MockTransport::new();
        let id = mock.seed("data-stores/1/schemas", json!({ "name": "orders" }));
        mock.send(ApiRequest::delete("data-stores/1/schemas", json!({ "ids": [id] })))
            .await
            .unwrap();
        let found = mock
            .send(ApiRequest::get("data-stores/1/schemas").query("name", "orders"))
            .await
            .unwrap();
        assert!(found["data"].as_array().unwrap().is_empty());
        assert_eq!(
            mock.record("data-stores/1/schemas", id).unwrap()["deprecated"],
            true
        );
        assert_eq!(mock.write_count(), 1);
    }

    #[tokio::test]
    async fn test_manifest_status_script() {
        let mock = MockTransport::new();
        mock.set_manifest_statuses(&["running", "failed"]);
        let submitted = mock
            .upload(Upload {
                path: "data-stores/1/dbt-manifest".into(),
                field: "manifest".into(),
                file_name: "manifest.json".into(),
                content: bytes::Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();
        let pid = submitted["process_id"].as_i64().unwrap();
        let path = format!("data-stores/1/dbt-manifest/{pid}");
        let first = mock.send(ApiRequest::get(path.clone())).await.unwrap();
        let second = mock.send(ApiRequest::get(path.clone())).await.unwrap();
        let third = mock.send(ApiRequest::get(path)).await.unwrap();
        assert_eq!(first["status"], "running");
        assert_eq!(second["status"], "failed");
        assert_eq!(third["status"], "failed");
        assert_eq!(second["message"], "manifest could not be parsed");
    }
}
