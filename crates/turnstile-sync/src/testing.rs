//! # In-Memory Test Doubles
//!
//! Deterministic implementations of the device and remote capabilities
//! for tests: a scripted terminal and a recording remote endpoint with
//! switchable failure modes. They live in the library (not behind
//! `cfg(test)`) so integration tests and downstream consumers can drive
//! the engine without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Value};

use crate::device::{
    ClockEvent, DeviceClient, DeviceError, DeviceResult, DeviceSession, EnrolledUser,
};
use crate::remote::{parse_wire_time, RemoteClient, RemoteError, RemoteResult};

// =============================================================================
// Mock Device
// =============================================================================

#[derive(Debug, Default)]
struct DeviceState {
    users: Vec<EnrolledUser>,
    events: Vec<ClockEvent>,
    serial: String,
    fail_connect: bool,
    fail_addresses: HashSet<String>,
    fail_reads: bool,
    connects: u32,
    disconnects: u32,
}

/// A scripted terminal. Clone-cheap: clones share state, so a test can
/// keep a handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = MockDevice::default();
        device.state.lock().unwrap().serial = "MOCK-0001".to_string();
        device
    }

    pub fn with_serial(self, serial: &str) -> Self {
        self.state.lock().unwrap().serial = serial.to_string();
        self
    }

    /// Enrolls a user on the scripted device.
    pub fn enroll(&self, device_uid: i64, user_id: &str, name: &str) {
        self.state.lock().unwrap().users.push(EnrolledUser {
            device_uid,
            user_id: user_id.to_string(),
            name: name.to_string(),
        });
    }

    /// Records a clock event on the scripted device.
    pub fn clock(&self, user_id: &str, timestamp: NaiveDateTime) {
        self.state.lock().unwrap().events.push(ClockEvent {
            user_id: user_id.to_string(),
            timestamp,
        });
    }

    /// Makes every subsequent connect fail.
    pub fn fail_connections(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    /// Makes connects to one address fail, leaving other machines
    /// reachable.
    pub fn fail_address(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_addresses
            .insert(address.to_string());
    }

    /// Makes reads on established sessions fail.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn disconnect_count(&self) -> u32 {
        self.state.lock().unwrap().disconnects
    }
}

#[async_trait]
impl DeviceClient for MockDevice {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        _passcode: &str,
        _timeout: Duration,
    ) -> DeviceResult<Box<dyn DeviceSession>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect || state.fail_addresses.contains(address) {
            return Err(DeviceError::Connect {
                address: address.to_string(),
                port,
                reason: "scripted failure".to_string(),
            });
        }
        state.connects += 1;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<DeviceState>>,
}

impl MockSession {
    fn check_read(&self) -> DeviceResult<()> {
        if self.state.lock().unwrap().fail_reads {
            Err(DeviceError::Read("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn users(&mut self) -> DeviceResult<Vec<EnrolledUser>> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().users.clone())
    }

    async fn attendance(&mut self) -> DeviceResult<Vec<ClockEvent>> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().events.clone())
    }

    async fn serial_number(&mut self) -> DeviceResult<String> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().serial.clone())
    }

    async fn disconnect(&mut self) {
        self.state.lock().unwrap().disconnects += 1;
    }
}

// =============================================================================
// Mock Remote
// =============================================================================

#[derive(Debug, Default)]
struct RemoteState {
    fail_auth: bool,
    /// Fail this many create calls before succeeding again.
    fail_creates: u32,
    fail_searches: bool,
    next_id: i64,
    /// Latest attendance timestamp per (remote machine id, user id), as
    /// a search_read for the attendance model would report it.
    latest: HashMap<(i64, String), String>,
    /// Machine-registry records, searchable by name. Duplicate names are
    /// allowed so ambiguity handling can be exercised.
    machines: Vec<(String, Value)>,
    /// Every successful create: (model, records).
    created: Vec<(String, Vec<Value>)>,
    auth_calls: u32,
    search_calls: u32,
}

/// A recording remote endpoint. Clone-cheap shared state, like
/// [`MockDevice`].
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        MockRemote::default()
    }

    pub fn fail_auth(&self, fail: bool) {
        self.state.lock().unwrap().fail_auth = fail;
    }

    /// Fails the next `count` create calls, then recovers.
    pub fn fail_next_creates(&self, count: u32) {
        self.state.lock().unwrap().fail_creates = count;
    }

    pub fn fail_searches(&self, fail: bool) {
        self.state.lock().unwrap().fail_searches = fail;
    }

    /// Registers a machine on the remote side. An absent timezone is
    /// reported as boolean false, the way the remote encodes an unset
    /// selection field.
    pub fn seed_machine(&self, name: &str, id: i64, timezone: Option<&str>) {
        let record = json!({
            "id": id,
            "timezone": timezone.map(Value::from).unwrap_or(Value::Bool(false)),
        });
        self.state
            .lock()
            .unwrap()
            .machines
            .push((name.to_string(), record));
    }

    /// Seeds the latest attendance timestamp the remote reports for a
    /// user on a machine (wire format).
    pub fn seed_latest(&self, remote_machine_id: i64, user_id: &str, timestamp: &str) {
        self.state
            .lock()
            .unwrap()
            .latest
            .insert((remote_machine_id, user_id.to_string()), timestamp.to_string());
    }

    /// Returns the size of every successful create call for `model`, in
    /// call order.
    pub fn create_sizes(&self, model: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(m, _)| m == model)
            .map(|(_, records)| records.len())
            .collect()
    }

    /// Returns every record successfully created for `model`.
    pub fn created_records(&self, model: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(m, _)| m == model)
            .flat_map(|(_, records)| records.clone())
            .collect()
    }

    pub fn auth_calls(&self) -> u32 {
        self.state.lock().unwrap().auth_calls
    }

    pub fn search_calls(&self) -> u32 {
        self.state.lock().unwrap().search_calls
    }
}

/// Pulls a comparison value out of a search domain: the third element of
/// the `[field, "=", value]` triple.
fn domain_value(domain: &Value, field: &str) -> Option<Value> {
    domain.as_array()?.iter().find_map(|clause| {
        let triple = clause.as_array()?;
        if triple.first()?.as_str()? == field {
            triple.get(2).cloned()
        } else {
            None
        }
    })
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn authenticate(&self) -> RemoteResult<i64> {
        let mut state = self.state.lock().unwrap();
        state.auth_calls += 1;
        if state.fail_auth {
            Err(RemoteError::Auth("scripted rejection".to_string()))
        } else {
            Ok(1)
        }
    }

    async fn search_read(
        &self,
        _model: &str,
        domain: Value,
        _fields: &[&str],
        _order: Option<&str>,
        _limit: Option<u32>,
    ) -> RemoteResult<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        state.search_calls += 1;
        if state.fail_searches {
            return Err(RemoteError::Transport("scripted failure".to_string()));
        }

        if let Some(name) = domain_value(&domain, "name").and_then(|v| v.as_str().map(String::from))
        {
            let rows = state
                .machines
                .iter()
                .filter(|(n, _)| *n == name)
                .map(|(_, record)| record.clone())
                .collect();
            return Ok(rows);
        }

        let user = domain_value(&domain, "user_id").and_then(|v| v.as_str().map(String::from));
        let machine = domain_value(&domain, "machine_id").and_then(|v| v.as_i64());

        let rows = match (machine, user) {
            (Some(machine), Some(user)) => state
                .latest
                .get(&(machine, user))
                .map(|ts| vec![json!({ "timestamp": ts })])
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(rows)
    }

    async fn create(&self, model: &str, records: Vec<Value>) -> RemoteResult<Vec<i64>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(RemoteError::Transport("scripted failure".to_string()));
        }

        let ids = records
            .iter()
            .map(|_| {
                state.next_id += 1;
                state.next_id
            })
            .collect();

        // Keep the reported latest timestamp consistent with what was
        // just created, the way a real endpoint would.
        for record in &records {
            if let (Some(machine), Some(user), Some(ts)) = (
                record.get("machine_id").and_then(|v| v.as_i64()),
                record.get("user_id").and_then(|v| v.as_str()),
                record.get("timestamp").and_then(|v| v.as_str()),
            ) {
                let key = (machine, user.to_string());
                let newer = match state.latest.get(&key) {
                    Some(existing) => {
                        parse_wire_time(ts) > parse_wire_time(existing)
                    }
                    None => true,
                };
                if newer {
                    state.latest.insert(key, ts.to_string());
                }
            }
        }

        state.created.push((model.to_string(), records));
        Ok(ids)
    }
}

// =============================================================================
// Tests
// =============================================================================
