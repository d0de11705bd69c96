use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::StoreError;
use crate::kv::KvStore;
use crate::lifecycle::{Analyzer, RecordLifecycle, Session, Submission};
use crate::ops::OperationTracker;
use crate::repository::{ListOutcome, RecordRepository};
use crate::stats::{self, AllergenCounting, Summary};

// --- OpCodes ---
pub const OP_CREATE: u8    = 0x01;
pub const OP_GET: u8       = 0x02;
pub const OP_LIST: u8      = 0x03;
pub const OP_ANALYZE: u8   = 0x04;
pub const OP_STATS: u8     = 0x05;
pub const OP_STATUS: u8    = 0x06;
pub const OP_SEARCH: u8    = 0x07;

// --- Response markers ---
pub const RESP_OK: u8 = 1;
pub const RESP_ERR: u8 = 0;

/// Largest request body accepted.
pub const MAX_REQUEST_BYTES: usize = 128 * 1024;

// --- Request bodies (JSON) ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    pub principal: Option<String>,
    pub submission: Submission,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RecordRequest {
    #[serde(default)]
    pub principal: Option<String>,
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StatsRequest {
    #[serde(default)]
    pub counting: AllergenCounting,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusRequest {
    pub op: Uuid,
}

// --- Response bodies (JSON) ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalyzeAccepted {
    pub op: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatsResponse {
    pub summary: Summary,
    /// Entries the listing had to drop.
    pub skipped: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub step: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&StoreError> for ErrorBody {
    fn from(e: &StoreError) -> Self {
        Self {
            step: e.step().to_string(),
            message: e.user_message(),
            retryable: e.is_retryable(),
        }
    }
}

/// A response frame before it hits the socket.
#[derive(Debug)]
pub struct Reply {
    pub ok: bool,
    pub body: Vec<u8>,
}

impl Reply {
    fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Reply { ok: true, body },
            Err(e) => Reply::message(format!("response encoding failed: {}", e)),
        }
    }

    fn err(e: &StoreError) -> Self {
        Reply {
            ok: false,
            body: serde_json::to_vec(&ErrorBody::from(e)).unwrap_or_default(),
        }
    }

    fn message(message: String) -> Self {
        let body = ErrorBody { step: "request".into(), message, retryable: false };
        Reply { ok: false, body: serde_json::to_vec(&body).unwrap_or_default() }
    }
}

/// Serves record operations to REPL clients over TCP.
pub struct FoodLogServer {
    backend: Arc<dyn Backend>,
    analyzer: Arc<dyn Analyzer>,
    ops: Arc<OperationTracker>,
}

impl FoodLogServer {
    pub fn new(backend: Arc<dyn Backend>, analyzer: Arc<dyn Analyzer>, ops: Arc<OperationTracker>) -> Self {
        Self { backend, analyzer, ops }
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("FoodLog listening on {}", addr);
        self.serve(listener).await;
        Ok(())
    }

    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("client connected from {}", peer);
                    let backend = self.backend.clone();
                    let analyzer = self.analyzer.clone();
                    let ops = self.ops.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, backend, analyzer, ops).await {
                            // Ignore expected disconnections to keep logs clean
                            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                                error!("client error: {}", e);
                            }
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
    }
}

/// One backend session per client connection: the availability probe runs
/// once when the client connects.
async fn handle_client(
    mut stream: TcpStream,
    backend: Arc<dyn Backend>,
    analyzer: Arc<dyn Analyzer>,
    ops: Arc<OperationTracker>,
) -> std::io::Result<()> {
    let lifecycle = KvStore::connect(backend)
        .await
        .map(|kv| RecordLifecycle::new(RecordRepository::new(kv), analyzer));

    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];

    loop {
        // 1. Read OpCode
        let mut op_buf = [0u8; 1];
        if stream.read_exact(&mut op_buf).await.is_err() {
            return Ok(());
        }
        let op_code = op_buf[0];

        // 2. Read Length
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let length = u32::from_le_bytes(len_buf) as usize;

        // 3. Read Body
        if length > buffer.len() {
            warn!("payload too large: {} bytes (max {})", length, MAX_REQUEST_BYTES);
            return Ok(());
        }
        stream.read_exact(&mut buffer[..length]).await?;
        let payload = &buffer[..length];

        // 4. Process Command
        let reply = match &lifecycle {
            Ok(lc) => dispatch(op_code, payload, lc, &ops).await,
            Err(e) => Reply::err(e),
        };

        let mut writer = BufWriter::new(&mut stream);
        writer.write_all(&[if reply.ok { RESP_OK } else { RESP_ERR }]).await?;
        writer.write_all(&(reply.body.len() as u32).to_le_bytes()).await?;
        writer.write_all(&reply.body).await?;
        writer.flush().await?;
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Reply> {
    serde_json::from_slice(payload).map_err(|e| Reply::message(format!("malformed request: {}", e)))
}

/// Executes one request against a connected session.
pub async fn dispatch(op_code: u8, payload: &[u8], lc: &RecordLifecycle, ops: &Arc<OperationTracker>) -> Reply {
    let result = match op_code {
        OP_CREATE => handle_create(payload, lc).await,
        OP_GET => handle_get(payload, lc).await,
        OP_LIST => handle_list(lc).await,
        OP_ANALYZE => handle_analyze(payload, lc, ops),
        OP_STATS => handle_stats(payload, lc).await,
        OP_STATUS => handle_status(payload, ops),
        OP_SEARCH => handle_search(payload, lc).await,
        _ => Err(Reply::message(format!("unknown opcode: 0x{:02X}", op_code))),
    };
    result.unwrap_or_else(|reply| reply)
}

async fn handle_create(payload: &[u8], lc: &RecordLifecycle) -> Result<Reply, Reply> {
    let req: CreateRequest = parse(payload)?;
    let session = Session::from_principal(req.principal);
    let record = lc.submit(&session, req.submission).await.map_err(|e| Reply::err(&e))?;
    Ok(Reply::ok(&record))
}

async fn handle_get(payload: &[u8], lc: &RecordLifecycle) -> Result<Reply, Reply> {
    let req: RecordRequest = parse(payload)?;
    let record = lc.repository().get(&req.id).await.map_err(|e| Reply::err(&e))?;
    Ok(Reply::ok(&record))
}

async fn handle_list(lc: &RecordLifecycle) -> Result<Reply, Reply> {
    let outcome = lc.repository().list().await.map_err(|e| Reply::err(&e))?;
    Ok(Reply::ok(&outcome))
}

async fn handle_search(payload: &[u8], lc: &RecordLifecycle) -> Result<Reply, Reply> {
    let req: SearchRequest = parse(payload)?;
    let outcome = lc.repository().list().await.map_err(|e| Reply::err(&e))?;
    let records = stats::filter_records(&outcome.records, &req.query).into_iter().cloned().collect();
    Ok(Reply::ok(&ListOutcome { records, ..outcome }))
}

async fn handle_stats(payload: &[u8], lc: &RecordLifecycle) -> Result<Reply, Reply> {
    let req: StatsRequest = if payload.is_empty() { StatsRequest::default() } else { parse(payload)? };
    let outcome = lc.repository().list().await.map_err(|e| Reply::err(&e))?;
    Ok(Reply::ok(&StatsResponse {
        summary: stats::summarize(&outcome.records, req.counting),
        skipped: outcome.skipped.len(),
    }))
}

/// Starts analysis in the background and hands back an operation id to poll.
fn handle_analyze(payload: &[u8], lc: &RecordLifecycle, ops: &Arc<OperationTracker>) -> Result<Reply, Reply> {
    let req: RecordRequest = parse(payload)?;
    let session = Session::from_principal(req.principal);
    session.require_signer().map_err(|e| Reply::err(&e))?;

    let op = ops.begin("analyze", "Analyzing with FHE...");
    let lc = lc.clone();
    let ops = ops.clone();
    let id = req.id;
    tokio::spawn(async move {
        match lc.analyze(&session, &id).await {
            Ok(record) => ops.succeed(op, format!("FHE analysis completed! {} is {}", record.id, record.status)),
            Err(e) => ops.fail(op, e.step(), format!("Analysis failed: {}", e.user_message())),
        }
    });

    Ok(Reply::ok(&AnalyzeAccepted { op }))
}

fn handle_status(payload: &[u8], ops: &Arc<OperationTracker>) -> Result<Reply, Reply> {
    let req: StatusRequest = parse(payload)?;
    match ops.status(req.op) {
        Some(op) => Ok(Reply::ok(&op)),
        None => Err(Reply::message(format!("unknown operation {}", req.op))),
    }
}
