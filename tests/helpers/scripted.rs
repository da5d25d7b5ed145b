//! In-memory transport that replays canned responses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use courier::{Address, BodySource, Connection, Error, Protocol, Request, ResponseHead, Result, Transport};
use http::{HeaderMap, Method};

/// One scripted exchange: optional interim heads, a final head and a body.
#[derive(Debug, Clone)]
pub struct Scripted {
    heads: Vec<ResponseHead>,
    body: Bytes,
}

#[allow(dead_code)]
impl Scripted {
    pub fn status(status: u16) -> Self {
        Self {
            heads: vec![head(status)],
            body: Bytes::new(),
        }
    }

    /// Send an interim head before the final one.
    pub fn interim(mut self, status: u16) -> Self {
        let last = self.heads.len() - 1;
        self.heads.insert(last, head(status));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Some(last) = self.heads.last_mut() {
            last.fields.push((name.to_string(), value.as_bytes().to_vec()));
        }
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Bytes::copy_from_slice(body.as_bytes());
        self
    }
}

fn head(status: u16) -> ResponseHead {
    ResponseHead {
        protocol: Protocol::Http1_1,
        status,
        message: String::new(),
        fields: Vec::new(),
    }
}

/// Transport whose connections answer from a shared script, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<Request>>>,
    connects: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Default::default()
        }
    }

    /// Requests written so far, as they reached the wire.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            address: address.clone(),
            transport: self.clone(),
            current: None,
            open: true,
        }))
    }
}

#[derive(Debug)]
pub struct ScriptedConnection {
    address: Address,
    transport: ScriptedTransport,
    current: Option<Scripted>,
    open: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn write_request(&mut self, request: &Request) -> Result<()> {
        self.transport.requests.lock().unwrap().push(request.clone());
        self.current = self.transport.script.lock().unwrap().pop_front();
        if self.current.is_none() {
            return Err(Error::UnexpectedEof(self.address.to_string()));
        }
        Ok(())
    }

    async fn read_head(&mut self) -> Result<ResponseHead> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::UnexpectedEof(self.address.to_string()))?;
        if current.heads.is_empty() {
            return Err(Error::UnexpectedEof(self.address.to_string()));
        }
        Ok(current.heads.remove(0))
    }

    async fn read_body(
        &mut self,
        _source: BodySource,
        _method: &Method,
        _status: u16,
        _headers: &HeaderMap,
    ) -> Result<Bytes> {
        Ok(self
            .current
            .take()
            .map(|current| current.body)
            .unwrap_or_default())
    }

    fn abort(&mut self) {
        self.open = false;
    }

    fn is_reusable(&self) -> bool {
        self.open
    }
}
