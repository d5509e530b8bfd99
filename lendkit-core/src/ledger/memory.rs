//! In-memory ledger running the book contract.
//!
//! Behaves like a single-peer network with the lending contract deployed:
//! submits are applied in call order and appended to per-key history, evaluates
//! run against the committed state. Every session and invocation is recorded so
//! tests can assert what reached the ledger, and faults can be injected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Channel, LedgerGateway, LedgerSession};
use crate::book::KEY_SEPARATOR;
use crate::defaults;
use crate::error::{LendKitError, LendKitResult};
use crate::identity::Identity;

const LEDGER_URL: &str = "memory://ledger";

/// A failure the ledger should produce until cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerFault {
    /// Sessions cannot be opened.
    Unreachable,
    /// Sessions open but topology discovery fails.
    DiscoveryFailure,
    /// Submits commit but the reply is lost.
    LostReply,
    /// Submits are refused with this reason and not committed.
    Reject(String),
}

/// How an invocation reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Ordered write.
    Submit,
    /// Read-only query.
    Evaluate,
}

/// A recorded contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Identity the session was opened as.
    pub identity: String,
    /// Submit or evaluate.
    pub mode: InvocationMode,
    /// Channel name.
    pub channel: String,
    /// Contract function.
    pub function: String,
    /// Arguments.
    pub args: Vec<String>,
}

/// Contract-side book record, in the contract's own JSON shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredBook {
    name: String,
    owner: String,
    state: String,
    renter: String,
}

#[derive(Debug, Clone)]
struct Version {
    value: StoredBook,
    tx_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow<'a> {
    record: &'a StoredBook,
    tx_id: &'a str,
    timestamp: DateTime<Utc>,
    is_delete: bool,
}

#[derive(Serialize)]
struct ListingRow<'a> {
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "Record")]
    record: &'a StoredBook,
}

#[derive(Debug, Default)]
struct World {
    state: BTreeMap<String, StoredBook>,
    history: BTreeMap<String, Vec<Version>>,
}

/// What a contract call produced: an optional write and the returned payload.
struct Effect {
    write: Option<(String, StoredBook)>,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct Shared {
    channels: BTreeMap<String, Vec<String>>,
    world: Mutex<World>,
    invocations: Mutex<Vec<Invocation>>,
    fault: Mutex<Option<LedgerFault>>,
    latency: Mutex<Duration>,
    open_attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    tx_counter: AtomicU64,
}

/// In-memory [`LedgerGateway`].
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// A ledger with the book contract deployed on the default channel.
    #[must_use]
    pub fn new() -> Self {
        Self::with_channels([(defaults::CHANNEL, &[defaults::CONTRACT][..])])
    }

    /// A ledger with the given channels, each listing its deployed contracts.
    #[must_use]
    pub fn with_channels<'a>(channels: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let channels = channels
            .into_iter()
            .map(|(name, contracts)| {
                (
                    name.to_string(),
                    contracts.iter().map(ToString::to_string).collect(),
                )
            })
            .collect();
        Self {
            shared: Arc::new(Shared {
                channels,
                world: Mutex::new(World::default()),
                invocations: Mutex::new(Vec::new()),
                fault: Mutex::new(None),
                latency: Mutex::new(Duration::ZERO),
                open_attempts: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                tx_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Injects `fault`, or clears it with `None`.
    pub fn set_fault(&self, fault: Option<LedgerFault>) {
        if let Ok(mut slot) = self.shared.fault.lock() {
            *slot = fault;
        }
    }

    /// Delays every submit and evaluate by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.shared.latency.lock() {
            *slot = latency;
        }
    }

    /// Every invocation received, in arrival order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.shared
            .invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of `open` calls, successful or not.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.shared.open_attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions successfully opened.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of committed versions of `key`.
    #[must_use]
    pub fn committed_versions(&self, key: &str) -> usize {
        self.shared
            .world
            .lock()
            .map(|world| world.history.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Shared {
    fn fault(&self) -> Option<LedgerFault> {
        self.fault.lock().ok().and_then(|f| f.clone())
    }

    fn latency(&self) -> Duration {
        self.latency.lock().map_or(Duration::ZERO, |l| *l)
    }

    fn world(&self) -> LendKitResult<MutexGuard<'_, World>> {
        self.world.lock().map_err(|_| LendKitError::NetworkUnreachable {
            url: LEDGER_URL.to_string(),
            error: "world state lock poisoned".to_string(),
        })
    }

    fn record(&self, invocation: Invocation) {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation);
        }
    }

    fn next_tx_id(&self, identity: &str) -> String {
        let nonce = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_be_bytes());
        hasher.update(identity.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn open(&self, identity: &Identity) -> LendKitResult<Box<dyn LedgerSession>> {
        self.shared.open_attempts.fetch_add(1, Ordering::SeqCst);
        match self.shared.fault() {
            Some(LedgerFault::Unreachable) => {
                return Err(LendKitError::NetworkUnreachable {
                    url: LEDGER_URL.to_string(),
                    error: "connection refused".to_string(),
                })
            }
            Some(LedgerFault::DiscoveryFailure) => {
                return Err(LendKitError::DiscoveryFailed {
                    channel: "*".to_string(),
                    reason: "no peers answered discovery".to_string(),
                })
            }
            _ => {}
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        debug!(identity = identity.id(), "memory ledger session opened");
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            identity: identity.id().to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    identity: String,
    closed: AtomicBool,
}

impl MemorySession {
    /// Records the call and waits out the configured latency.
    async fn begin(
        &self,
        mode: InvocationMode,
        channel: &Channel,
        function: &str,
        args: &[String],
    ) -> LendKitResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LendKitError::NetworkUnreachable {
                url: LEDGER_URL.to_string(),
                error: "session is closed".to_string(),
            });
        }
        self.shared.record(Invocation {
            identity: self.identity.clone(),
            mode,
            channel: channel.name().to_string(),
            function: function.to_string(),
            args: args.to_vec(),
        });

        let latency = self.shared.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

fn rejected(reason: String) -> LendKitError {
    LendKitError::TransactionRejected {
        reason: Some(reason),
    }
}

#[async_trait]
impl LedgerSession for MemorySession {
    fn network(&self, channel: &str) -> LendKitResult<Channel> {
        let contracts = self.shared.channels.get(channel).ok_or_else(|| {
            LendKitError::DiscoveryFailed {
                channel: channel.to_string(),
                reason: "channel not found".to_string(),
            }
        })?;
        Ok(Channel::new(
            channel.to_string(),
            vec!["peer0.memory".to_string()],
            contracts.clone(),
        ))
    }

    async fn submit(
        &self,
        channel: &Channel,
        _contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>> {
        let fault = self.shared.fault();
        if let Some(LedgerFault::Reject(reason)) = &fault {
            self.shared.record(Invocation {
                identity: self.identity.clone(),
                mode: InvocationMode::Submit,
                channel: channel.name().to_string(),
                function: function.to_string(),
                args: args.to_vec(),
            });
            return Err(LendKitError::TransactionRejected {
                reason: Some(reason.clone()),
            });
        }

        self.begin(InvocationMode::Submit, channel, function, args)
            .await?;

        // Validate and commit under one guard; submits never interleave.
        let mut world = self.shared.world()?;
        let effect = execute(&world, function, args).map_err(rejected)?;
        if let Some((key, value)) = effect.write {
            let tx_id = self.shared.next_tx_id(&self.identity);
            world.history.entry(key.clone()).or_default().push(Version {
                value: value.clone(),
                tx_id: tx_id.clone(),
                timestamp: Utc::now(),
            });
            world.state.insert(key.clone(), value);
            debug!(key, tx_id, function, "memory ledger committed");
        }
        drop(world);

        if fault == Some(LedgerFault::LostReply) {
            return Err(LendKitError::OutcomeUnknown {
                operation: function.to_string(),
            });
        }
        Ok(effect.payload)
    }

    async fn evaluate(
        &self,
        channel: &Channel,
        _contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>> {
        self.begin(InvocationMode::Evaluate, channel, function, args)
            .await?;
        let world = self.shared.world()?;
        execute(&world, function, args)
            .map(|effect| effect.payload)
            .map_err(rejected)
    }

    async fn close(&self) -> LendKitResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn expect_args(args: &[String], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "Incorrect number of params. Expected {expected}, received {}",
            args.len()
        ))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| e.to_string())
}

fn transition(
    world: &World,
    key: &str,
    allowed: &[&str],
    apply: impl FnOnce(&mut StoredBook),
) -> Result<Effect, String> {
    let mut book = world.state.get(key).cloned().unwrap_or_default();
    if !allowed.contains(&book.state.as_str()) {
        return Err(format!("{key} STATE is not appropriate: {} ", book.state));
    }
    apply(&mut book);
    Ok(Effect {
        write: Some((key.to_string(), book)),
        payload: Vec::new(),
    })
}

/// The lending contract.
fn execute(world: &World, function: &str, args: &[String]) -> Result<Effect, String> {
    match function {
        "RegisterBook" => {
            expect_args(args, 2)?;
            let key = format!("{}{KEY_SEPARATOR}{}", args[0], args[1]);
            if world.state.contains_key(&key) {
                return Err(format!("{key} already exist in world state"));
            }
            let book = StoredBook {
                name: args[0].clone(),
                owner: args[1].clone(),
                state: "registered".to_string(),
                renter: String::new(),
            };
            Ok(Effect {
                write: Some((key, book)),
                payload: Vec::new(),
            })
        }
        "ReqRent" => {
            expect_args(args, 2)?;
            let renter = args[1].clone();
            transition(world, &args[0], &["registered", "returned"], |book| {
                book.state = "inRequest".to_string();
                book.renter = renter;
            })
        }
        "RentBook" => {
            expect_args(args, 1)?;
            transition(world, &args[0], &["inRequest"], |book| {
                book.state = "rented".to_string();
            })
        }
        "ReturnBook" => {
            expect_args(args, 1)?;
            transition(world, &args[0], &["rented"], |book| {
                book.state = "returned".to_string();
                book.renter.clear();
            })
        }
        "QueryBook" => {
            expect_args(args, 1)?;
            let book = world.state.get(&args[0]).cloned().unwrap_or_default();
            Ok(Effect {
                write: None,
                payload: to_json(&book)?,
            })
        }
        "History" => {
            expect_args(args, 1)?;
            let payload = match world.history.get(&args[0]) {
                Some(versions) => to_json(
                    &versions
                        .iter()
                        .map(|v| HistoryRow {
                            record: &v.value,
                            tx_id: &v.tx_id,
                            timestamp: v.timestamp,
                            is_delete: false,
                        })
                        .collect::<Vec<_>>(),
                )?,
                None => b"null".to_vec(),
            };
            Ok(Effect {
                write: None,
                payload,
            })
        }
        "QueryAllBook" => {
            expect_args(args, 0)?;
            let rows: Vec<_> = world
                .state
                .iter()
                .map(|(key, record)| ListingRow { key, record })
                .collect();
            Ok(Effect {
                write: None,
                payload: to_json(&rows)?,
            })
        }
        other => Err(format!("Function {other} not found in contract SmartContract")),
    }
}
