//! In-process engines for tests.
//! - FakeKernel: scripted kernel debugger (connector + code executor)
//! - ManualEngine: engine end driven step by step from a test

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::controller::CodeExecutor;
use crate::error::DebugResult;
use crate::source_id::{IdentityFormat, SourceRegistry};
use crate::transport::{Channel, Connector};

pub(crate) const TMP_PREFIX: &str = "/tmp/ipykernel_7/";
pub(crate) const TMP_SUFFIX: &str = ".py";

/// Poll `condition` until it holds; panics after two seconds.
pub(crate) async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Clone)]
struct Stop {
    path: String,
    line: u32,
    remaining: Vec<u32>,
    count: u32,
}

#[derive(Debug)]
struct KernelState {
    registry: SourceRegistry,
    next_breakpoint_id: u32,
    next_seq: u32,
    breakpoints: IndexMap<String, Vec<Value>>,
    sources: HashMap<String, String>,
    requests: Vec<String>,
    failing_frames: Vec<u32>,
    stop: Option<Stop>,
    stop_count: u32,
    engine: Option<UnboundedSender<Value>>,
}

/// A kernel debugger stand-in. Breakpoints hit in line order; every stop
/// reports two frames, each with `Locals` and `Globals` scopes.
#[derive(Debug, Clone)]
pub(crate) struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(KernelState {
                registry: SourceRegistry::new(IdentityFormat {
                    prefix: TMP_PREFIX.to_string(),
                    suffix: TMP_SUFFIX.to_string(),
                }),
                next_breakpoint_id: 1,
                next_seq: 1,
                breakpoints: IndexMap::new(),
                sources: HashMap::new(),
                requests: Vec::new(),
                failing_frames: Vec::new(),
                stop: None,
                stop_count: 0,
                engine: None,
            })),
        }
    }

    /// Commands received so far, in order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|seen| seen.as_str() == command)
            .count()
    }

    /// Make `scopes` fail for the frame at `index` (0 = innermost).
    pub(crate) fn fail_scopes_for_frame(&self, index: u32) {
        self.state.lock().failing_frames.push(index);
    }

    pub(crate) fn emit(&self, event: &str, body: Value) {
        let mut state = self.state.lock();
        let message = event_message(&mut state, event, body);
        if let Some(engine) = &state.engine {
            let _ = engine.send(message);
        }
    }

    fn handle(&self, request: &Value) -> Vec<Value> {
        let command = request["command"].as_str().unwrap_or_default().to_string();
        let args = &request["arguments"];
        let mut state = self.state.lock();
        state.requests.push(command.clone());
        let mut events = Vec::new();

        let result: Result<Value, String> = match command.as_str() {
            "initialize" => {
                events.push(("initialized", Value::Null));
                events.push(("thread", json!({"reason": "started", "threadId": 1})));
                Ok(json!({"supportsConfigurationDoneRequest": true}))
            }
            "dumpCell" => {
                let code = args["code"].as_str().unwrap_or_default().to_string();
                let path = state.registry.identify(&code).to_string();
                state.sources.insert(path.clone(), code);
                Ok(json!({"sourcePath": path}))
            }
            "setBreakpoints" => {
                let path = args["source"]["path"].as_str().unwrap_or_default().to_string();
                let lines: Vec<u64> = args["breakpoints"]
                    .as_array()
                    .map(|list| list.iter().filter_map(|bp| bp["line"].as_u64()).collect())
                    .unwrap_or_default();
                let mut acks = Vec::new();
                for line in lines {
                    let id = state.next_breakpoint_id;
                    state.next_breakpoint_id += 1;
                    acks.push(json!({
                        "id": id, "verified": true, "line": line, "source": {"path": path}
                    }));
                }
                if acks.is_empty() {
                    state.breakpoints.shift_remove(&path);
                } else {
                    state.breakpoints.insert(path, acks.clone());
                }
                Ok(json!({"breakpoints": acks}))
            }
            "configurationDone" => Ok(Value::Null),
            "debugInfo" => {
                let breakpoints: Vec<Value> = state
                    .breakpoints
                    .iter()
                    .map(|(source, list)| json!({"source": source, "breakpoints": list}))
                    .collect();
                let stopped: Vec<u32> = state.stop.iter().map(|_| 1).collect();
                Ok(json!({
                    "isStarted": true,
                    "hashMethod": "sha256",
                    "hashSeed": 0,
                    "tmpFilePrefix": TMP_PREFIX,
                    "tmpFileSuffix": TMP_SUFFIX,
                    "breakpoints": breakpoints,
                    "stoppedThreads": stopped,
                }))
            }
            "stackTrace" => match &state.stop {
                Some(stop) => {
                    let base = stop.count * 10;
                    Ok(json!({"stackFrames": [
                        {"id": base + 1, "name": "cell", "line": stop.line, "column": 1,
                         "source": {"path": stop.path}},
                        {"id": base + 2, "name": "<module>", "line": 1, "column": 1,
                         "source": {"path": stop.path}},
                    ]}))
                }
                None => Err("thread is not stopped".to_string()),
            },
            "scopes" => {
                let frame_id = u32::try_from(args["frameId"].as_u64().unwrap_or_default())
                    .unwrap_or_default();
                let index = (frame_id % 10).saturating_sub(1);
                if state.failing_frames.contains(&index) {
                    Err(format!("no scopes for frame {frame_id}"))
                } else {
                    Ok(json!({"scopes": [
                        {"name": "Locals", "variablesReference": frame_id * 100 + 1},
                        {"name": "Globals", "variablesReference": frame_id * 100 + 2},
                    ]}))
                }
            }
            "variables" => {
                let reference = args["variablesReference"].as_u64().unwrap_or_default();
                let line = state.stop.as_ref().map_or(0, |stop| stop.line);
                Ok(match reference % 100 {
                    1 => json!({"variables": [
                        {"name": "i", "value": line.to_string(), "type": "int",
                         "variablesReference": 0},
                        {"name": "items", "value": "[1, 2]", "type": "list",
                         "variablesReference": reference * 10},
                    ]}),
                    2 => json!({"variables": [
                        {"name": "__name__", "value": "'__main__'", "type": "str",
                         "variablesReference": 0},
                    ]}),
                    _ => json!({"variables": [
                        {"name": "0", "value": "1", "type": "int", "variablesReference": 0},
                        {"name": "1", "value": "2", "type": "int", "variablesReference": 0},
                    ]}),
                })
            }
            "continue" | "next" | "stepIn" | "stepOut" => match state.stop.take() {
                Some(stop) => {
                    events.push(("continued", json!({"threadId": 1})));
                    let next_line = if command == "continue" {
                        stop.remaining.first().copied()
                    } else {
                        Some(stop.line + 1)
                    };
                    if let Some(line) = next_line {
                        state.stop_count += 1;
                        let remaining = stop
                            .remaining
                            .iter()
                            .copied()
                            .filter(|candidate| *candidate > line)
                            .collect();
                        state.stop = Some(Stop {
                            path: stop.path,
                            line,
                            remaining,
                            count: state.stop_count,
                        });
                        events.push(("stopped", json!({"reason": "breakpoint", "threadId": 1})));
                    }
                    Ok(json!({"allThreadsContinued": true}))
                }
                None => Err("thread is not stopped".to_string()),
            },
            "source" => {
                let path = args["source"]["path"].as_str().unwrap_or_default();
                match state.sources.get(path) {
                    Some(content) => Ok(json!({"content": content, "mimeType": "text/x-python"})),
                    None => Err(format!("unknown source {path}")),
                }
            }
            "disconnect" => {
                state.breakpoints.clear();
                state.stop = None;
                Ok(Value::Null)
            }
            other => Err(format!("unsupported command {other}")),
        };

        let mut outgoing = vec![response_message(&mut state, request, result)];
        for (event, body) in events {
            outgoing.push(event_message(&mut state, event, body));
        }
        outgoing
    }
}

impl Connector for FakeKernel {
    fn connect(&mut self) -> DebugResult<Channel> {
        let (client, mut engine) = Channel::pair();
        self.state.lock().engine = Some(engine.sender());
        let kernel = self.clone();
        tokio::spawn(async move {
            while let Some(request) = engine.recv().await {
                for message in kernel.handle(&request) {
                    engine.send(message);
                }
            }
        });
        Ok(client)
    }
}

impl CodeExecutor for FakeKernel {
    fn execute(&self, code: &str) -> DebugResult<()> {
        let mut state = self.state.lock();
        let path = state.registry.identify(code).to_string();
        state.sources.insert(path.clone(), code.to_string());
        let mut lines: Vec<u32> = state
            .breakpoints
            .get(&path)
            .map(|list| {
                list.iter()
                    .filter_map(|bp| bp["line"].as_u64())
                    .filter_map(|line| u32::try_from(line).ok())
                    .collect()
            })
            .unwrap_or_default();
        lines.sort_unstable();
        if lines.is_empty() {
            return Ok(());
        }
        let line = lines.remove(0);
        state.stop_count += 1;
        state.stop = Some(Stop {
            path,
            line,
            remaining: lines,
            count: state.stop_count,
        });
        let message = event_message(
            &mut state,
            "stopped",
            json!({"reason": "breakpoint", "threadId": 1}),
        );
        if let Some(engine) = &state.engine {
            let _ = engine.send(message);
        }
        Ok(())
    }
}

fn response_message(
    state: &mut KernelState,
    request: &Value,
    result: Result<Value, String>,
) -> Value {
    let seq = state.next_seq;
    state.next_seq += 1;
    let mut message = json!({
        "seq": seq,
        "type": "response",
        "request_seq": request["seq"],
        "command": request["command"],
    });
    match result {
        Ok(body) => {
            message["success"] = json!(true);
            if !body.is_null() {
                message["body"] = body;
            }
        }
        Err(error) => {
            message["success"] = json!(false);
            message["message"] = json!(error);
        }
    }
    message
}

fn event_message(state: &mut KernelState, event: &str, body: Value) -> Value {
    let seq = state.next_seq;
    state.next_seq += 1;
    let mut message = json!({"seq": seq, "type": "event", "event": event});
    if !body.is_null() {
        message["body"] = body;
    }
    message
}

/// Hands out the engine end of every channel it creates.
pub(crate) struct ManualConnector {
    engines: UnboundedSender<Channel>,
}

pub(crate) fn manual_connector() -> (ManualConnector, UnboundedReceiver<Channel>) {
    let (engines, receiver) = mpsc::unbounded_channel();
    (ManualConnector { engines }, receiver)
}

impl Connector for ManualConnector {
    fn connect(&mut self) -> DebugResult<Channel> {
        let (client, engine) = Channel::pair();
        let _ = self.engines.send(engine);
        Ok(client)
    }
}

/// Engine end of a channel, answered by hand from a test.
pub(crate) struct ManualEngine {
    channel: Channel,
    next_seq: u32,
}

impl ManualEngine {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            channel,
            next_seq: 1,
        }
    }

    /// Next request, which must be `command`.
    pub(crate) async fn expect_request(&mut self, command: &str) -> Value {
        let request = tokio::time::timeout(Duration::from_secs(2), self.channel.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for '{command}'"))
            .expect("client hung up");
        assert_eq!(request["command"], command, "unexpected request {request}");
        request
    }

    pub(crate) fn reply(&mut self, request: &Value, body: Value) {
        let seq = self.bump();
        self.channel.send(json!({
            "seq": seq,
            "type": "response",
            "request_seq": request["seq"],
            "success": true,
            "command": request["command"],
            "body": body,
        }));
    }

    pub(crate) fn fail(&mut self, request: &Value, message: &str) {
        let seq = self.bump();
        self.channel.send(json!({
            "seq": seq,
            "type": "response",
            "request_seq": request["seq"],
            "success": false,
            "command": request["command"],
            "message": message,
        }));
    }

    pub(crate) fn emit(&mut self, event: &str, body: Value) {
        let seq = self.bump();
        self.channel
            .send(json!({"seq": seq, "type": "event", "event": event, "body": body}));
    }

    fn bump(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
