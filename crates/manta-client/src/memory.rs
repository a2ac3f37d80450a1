//! In-memory object store for testing and local development
//!
//! Paths behave like Manta paths: every object and directory needs an
//! existing parent directory, and `/` always exists. Jobs are recorded as
//! submitted and only make progress when [`MemoryStore::run_job`] is called,
//! which understands the concatenate and cleanup programs rendered by
//! [`crate::script`].

use crate::store::ObjectStore;
use crate::types::{
    DirectoryEntry, JobPhase, JobState, ObjectBody, ObjectHeaders, ObjectInfo, ObjectMetadata, PutObjectResult,
    RemoteJob,
};
use crate::{ClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use manta_crypto::{BytesEntity, DigestedEntity, Entity};
use md5::Md5;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
enum Node {
    Directory { created: DateTime<Utc> },
    Object(StoredObject),
}

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_md5: String,
    content_type: Option<String>,
    headers: ObjectMetadata,
    last_modified: DateTime<Utc>,
}

/// An in-memory object store
#[derive(Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<DashMap<String, Node>>,
    jobs: Arc<DashMap<Uuid, RemoteJob>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything exists at `path`
    pub fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        path == "/" || self.nodes.contains_key(&path)
    }

    /// Number of stored objects, directories excluded
    pub fn object_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|entry| matches!(entry.value(), Node::Object(_)))
            .count()
    }

    /// All recorded jobs
    pub fn jobs(&self) -> Vec<RemoteJob> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Force a job into a given state
    pub fn set_job_state(&self, id: Uuid, state: JobState) -> Result<()> {
        let mut job = self.jobs.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.state = state;
        Ok(())
    }

    /// Execute a submitted job's phases in order.
    ///
    /// Cancelled or finished jobs are left untouched. The job ends `done`
    /// whether or not a phase failed; the first failure is returned.
    pub fn run_job(&self, id: Uuid) -> Result<()> {
        let phases = {
            let mut job = self.jobs.get_mut(&id).ok_or_else(|| job_not_found(id))?;
            if job.cancelled || !job.state.is_active() {
                return Ok(());
            }
            job.state = JobState::Running;
            job.phases.clone()
        };

        debug!(job_id = %id, phases = phases.len(), "Running job");
        let env = [("MANTA_JOB_ID", id.to_string())];
        let result = phases
            .iter()
            .try_for_each(|phase| self.execute(&tokenize(&phase.exec, &env)?));

        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.state = JobState::Done;
        }
        result
    }

    fn node(&self, path: &str) -> Option<Node> {
        self.nodes.get(path).map(|entry| entry.value().clone())
    }

    fn require_directory(&self, path: &str) -> Result<()> {
        if path == "/" {
            return Ok(());
        }
        match self.node(path) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(Node::Object(_)) => Err(not_a_directory(path)),
            None => Err(ClientError::not_found(path)),
        }
    }

    fn store(&self, path: &str, data: Bytes, content_md5: String, headers: &ObjectHeaders) -> Result<PutObjectResult> {
        let path = normalize(path);
        self.require_directory(parent(&path))?;
        if let Some(Node::Directory { .. }) = self.node(&path) {
            return Err(ClientError::Remote {
                status: 400,
                message: format!("{} is a directory", path),
            });
        }

        let etag = Uuid::new_v4().to_string();
        debug!(path = %path, size = data.len(), etag = %etag, "Storing object");
        self.nodes.insert(
            path,
            Node::Object(StoredObject {
                data,
                etag: etag.clone(),
                content_md5: content_md5.clone(),
                content_type: headers.content_type.clone(),
                headers: headers.headers.clone(),
                last_modified: Utc::now(),
            }),
        );

        Ok(PutObjectResult {
            etag,
            content_md5: Some(content_md5),
        })
    }

    fn read(&self, path: &str) -> Result<Bytes> {
        let path = normalize(path);
        match self.node(&path) {
            Some(Node::Object(object)) => Ok(object.data),
            Some(Node::Directory { .. }) => Err(ClientError::Remote {
                status: 400,
                message: format!("{} is a directory", path),
            }),
            None => Err(ClientError::not_found(path)),
        }
    }

    fn remove_tree(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        if !self.nodes.contains_key(&path) {
            return Err(ClientError::not_found(path));
        }
        let prefix = format!("{}/", path);
        self.nodes.retain(|key, _| key != &path && !key.starts_with(&prefix));
        debug!(path = %path, "Deleted recursively");
        Ok(())
    }

    fn execute(&self, tokens: &[Token]) -> Result<()> {
        for statement in tokens.split(|t| *t == Token::Semicolon) {
            let mut piped: Option<Bytes> = None;
            for command in statement.split(|t| *t == Token::Pipe) {
                let words: Vec<&str> = command
                    .iter()
                    .filter_map(|t| match t {
                        Token::Word(w) => Some(w.as_str()),
                        _ => None,
                    })
                    .collect();
                piped = self.run_command(&words, piped.take())?;
            }
        }
        Ok(())
    }

    fn run_command(&self, words: &[&str], stdin: Option<Bytes>) -> Result<Option<Bytes>> {
        let Some((&program, args)) = words.split_first() else {
            return Ok(stdin);
        };

        match program {
            "set" => Ok(stdin),
            "mget" => {
                let mut out = Vec::new();
                for path in args.iter().filter(|a| !a.starts_with('-')) {
                    out.extend_from_slice(&self.read(path)?);
                }
                Ok(Some(Bytes::from(out)))
            }
            "mput" => {
                let mut headers = ObjectHeaders::new();
                let mut target = None;
                let mut iter = args.iter();
                while let Some(arg) = iter.next() {
                    match *arg {
                        "-H" => {
                            let header = iter.next().ok_or_else(|| bad_command("mput -H needs a value"))?;
                            let (name, value) = header
                                .split_once(':')
                                .ok_or_else(|| bad_command(format!("malformed header: {}", header)))?;
                            let (name, value) = (name.trim(), value.trim());
                            if name.eq_ignore_ascii_case("content-type") {
                                headers.content_type = Some(value.to_string());
                            } else {
                                headers.headers.insert(name.to_string(), value.to_string());
                            }
                        }
                        "-q" => {}
                        path => target = Some(path),
                    }
                }
                let target = target.ok_or_else(|| bad_command("mput needs a target path"))?;
                let data = stdin.unwrap_or_default();
                let md5 = manta_crypto::md5_hex(&data);
                self.store(target, data, md5, &headers)?;
                Ok(None)
            }
            "mrm" => {
                for path in args.iter().filter(|a| !a.starts_with('-')) {
                    self.remove_tree(path)?;
                }
                Ok(None)
            }
            other => Err(bad_command(format!("unsupported command: {}", other))),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, path: &str, body: ObjectBody, headers: &ObjectHeaders) -> Result<PutObjectResult> {
        let entity: Box<dyn Entity + Send> = match body {
            ObjectBody::Bytes(bytes) => Box::new(BytesEntity::new(bytes)),
            ObjectBody::Entity(entity) => entity,
        };

        let mut digested = DigestedEntity::new(entity, Md5::default());
        let mut buf = Vec::with_capacity(digested.content_length().unwrap_or(0) as usize);
        digested.write_to(&mut buf)?;
        let md5 = hex::encode(digested.finalize());

        self.store(path, Bytes::from(buf), md5, headers)
    }

    async fn head_object(&self, path: &str) -> Result<ObjectInfo> {
        let path = normalize(path);
        let node = if path == "/" {
            Node::Directory {
                created: DateTime::<Utc>::default(),
            }
        } else {
            self.node(&path).ok_or_else(|| ClientError::not_found(path.clone()))?
        };

        Ok(match node {
            Node::Directory { created } => ObjectInfo {
                path,
                etag: String::new(),
                content_length: 0,
                content_type: Some("application/x-json-stream; type=directory".to_string()),
                headers: ObjectMetadata::new(),
                is_directory: true,
                last_modified: created,
            },
            Node::Object(object) => {
                let mut headers = object.headers;
                headers.insert("content-md5".to_string(), object.content_md5);
                ObjectInfo {
                    path,
                    etag: object.etag,
                    content_length: object.data.len() as u64,
                    content_type: object.content_type,
                    headers,
                    is_directory: false,
                    last_modified: object.last_modified,
                }
            }
        })
    }

    async fn get_object_stream(&self, path: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let data = self.read(path)?;
        Ok(stream::iter(vec![Ok(data)]).boxed())
    }

    async fn put_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let path = normalize(path);
        if path == "/" {
            return Ok(());
        }

        let mut missing = vec![path.clone()];
        if recursive {
            let mut current = parent(&path);
            while current != "/" && !self.nodes.contains_key(current) {
                missing.push(current.to_string());
                current = parent(current);
            }
        }
        self.require_directory(parent(missing.last().map(String::as_str).unwrap_or("/")))?;

        for dir in missing.into_iter().rev() {
            match self.node(&dir) {
                Some(Node::Directory { .. }) => {}
                Some(Node::Object(_)) => return Err(not_a_directory(&dir)),
                None => {
                    self.nodes.insert(dir, Node::Directory { created: Utc::now() });
                }
            }
        }
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<BoxStream<'static, Result<DirectoryEntry>>> {
        let path = normalize(path);
        self.require_directory(&path)?;

        let mut entries: Vec<DirectoryEntry> = self
            .nodes
            .iter()
            .filter(|entry| entry.key() != "/" && parent(entry.key()) == path)
            .map(|entry| match entry.value() {
                Node::Directory { .. } => DirectoryEntry {
                    path: entry.key().clone(),
                    is_directory: true,
                    etag: None,
                    size: 0,
                },
                Node::Object(object) => DirectoryEntry {
                    path: entry.key().clone(),
                    is_directory: false,
                    etag: Some(object.etag.clone()),
                    size: object.data.len() as u64,
                },
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn delete_recursive(&self, path: &str) -> Result<()> {
        self.remove_tree(path)
    }

    async fn submit_job(&self, name: &str, phases: Vec<JobPhase>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        debug!(job_id = %id, name = %name, "Job submitted");
        self.jobs.insert(
            id,
            RemoteJob {
                id,
                name: name.to_string(),
                state: JobState::Queued,
                cancelled: false,
                created_at: Utc::now(),
                phases,
            },
        );
        Ok(id)
    }

    async fn cancel_job(&self, id: Uuid) -> Result<()> {
        let mut job = self.jobs.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.cancelled = true;
        job.state = JobState::Done;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<RemoteJob> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| job_not_found(id))
    }

    async fn list_jobs_by_name(&self, name: &str) -> Result<BoxStream<'static, Result<RemoteJob>>> {
        let mut jobs: Vec<RemoteJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stream::iter(jobs.into_iter().map(Ok)).boxed())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn job_not_found(id: Uuid) -> ClientError {
    ClientError::not_found(format!("/jobs/{}", id))
}

fn not_a_directory(path: &str) -> ClientError {
    ClientError::Remote {
        status: 400,
        message: format!("{} is not a directory", path),
    }
}

fn bad_command(message: impl Into<String>) -> ClientError {
    ClientError::Remote {
        status: 400,
        message: message.into(),
    }
}

/// Shell token
#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Semicolon,
    Pipe,
}

/// Split a POSIX-shell-like command line into words and operators.
///
/// Handles single quotes, double quotes with `\` escapes, bare `\` escapes
/// and `$NAME` expansion outside single quotes.
fn tokenize(input: &str, env: &[(&str, String)]) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    let expand = |chars: &mut std::iter::Peekable<std::str::Chars<'_>>, word: &mut String| {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            word.push('$');
        } else if let Some((_, value)) = env.iter().find(|(k, _)| *k == name) {
            word.push_str(value);
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(bad_command("unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => return Err(bad_command("unterminated double quote")),
                        },
                        Some('$') => expand(&mut chars, &mut word),
                        Some(ch) => word.push(ch),
                        None => return Err(bad_command("unterminated double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    word.push(ch);
                }
            }
            '$' => {
                in_word = true;
                expand(&mut chars, &mut word);
            }
            ';' | '|' => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
                tokens.push(if c == ';' { Token::Semicolon } else { Token::Pipe });
            }
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        tokens.push(Token::Word(word));
    }
    Ok(tokens)
}
