//! In-memory device simulator for tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use naos_frame::{Message, ACK, CONTROL, END, HANDSHAKE, METRICS, PARAMS, RELAY};
use naos_transport::{Device, MemoryChannel, MemoryDevice, MemoryPeer};

struct Param {
    reference: u8,
    kind: u8,
    mode: u8,
    name: &'static str,
    value: Vec<u8>,
    age: u64,
}

struct State {
    password: Option<&'static str>,
    unlocked: HashSet<u16>,
    next_session: u16,
    opened: usize,
    ended: usize,
    clock: u64,
    ping_ack: u8,
    params: Vec<Param>,
    commands: Vec<Message>,
    peers: Vec<Arc<MemoryPeer>>,
}

/// A device with params, relay and metrics endpoints.
#[derive(Clone)]
pub(crate) struct Simulator {
    state: Arc<Mutex<State>>,
}

impl Simulator {
    pub(crate) fn new() -> Self {
        Self::with_password(None)
    }

    pub(crate) fn locked(password: &'static str) -> Self {
        Self::with_password(Some(password))
    }

    fn with_password(password: Option<&'static str>) -> Self {
        let param = |reference: u8, kind, name, value: &[u8]| Param {
            reference,
            kind,
            mode: 4,
            name,
            value: value.to_vec(),
            // actions carry no value and never show up as changed
            age: if kind == 5 { 0 } else { reference as u64 + 1 },
        };
        Self {
            state: Arc::new(Mutex::new(State {
                password,
                unlocked: HashSet::new(),
                next_session: 1,
                opened: 0,
                ended: 0,
                clock: 3,
                ping_ack: 1,
                params: vec![
                    param(0, 1, "name", b"naos"),
                    param(1, 3, "count", b"1"),
                    param(2, 5, "reboot", b""),
                ],
                commands: Vec::new(),
                peers: Vec::new(),
            })),
        }
    }

    /// A device whose every open connects a fresh link to this simulator.
    pub(crate) fn device(&self) -> Arc<dyn Device> {
        let sim = self.clone();
        Arc::new(MemoryDevice::new("sim", move || {
            let (channel, peer) = MemoryChannel::pair();
            sim.attach(peer);
            channel
        }))
    }

    /// Change a parameter on the device side.
    pub(crate) fn set_param(&self, name: &str, value: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let clock = state.clock;
        if let Some(param) = state.params.iter_mut().find(|p| p.name == name) {
            param.value = value.to_vec();
            param.age = clock;
        }
    }

    pub(crate) fn param(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.params.iter().find(|p| p.name == name).map(|p| p.value.clone())
    }

    /// Acknowledgement code sent in reply to pings.
    pub(crate) fn set_ping_ack(&self, code: u8) {
        self.state.lock().unwrap().ping_ack = code;
    }

    pub(crate) fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub(crate) fn sessions_ended(&self) -> usize {
        self.state.lock().unwrap().ended
    }

    /// Payload of the last command received on an endpoint.
    pub(crate) fn last_command(&self, endpoint: u8) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .commands
            .iter()
            .rev()
            .find(|m| m.endpoint == endpoint)
            .map(|m| m.data.to_vec())
    }

    /// Drop every link as if the device went away.
    pub(crate) fn disconnect(&self) {
        let peers = std::mem::take(&mut self.state.lock().unwrap().peers);
        for peer in peers {
            peer.close();
        }
    }

    fn attach(&self, peer: MemoryPeer) {
        let peer = Arc::new(peer);
        self.state.lock().unwrap().peers.push(Arc::clone(&peer));
        let sim = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = peer.recv().await {
                let Ok(msg) = Message::decode(&frame) else {
                    continue;
                };
                for reply in sim.handle(&msg) {
                    peer.send(reply.encode());
                }
            }
        });
    }

    fn handle(&self, msg: &Message) -> Vec<Message> {
        let mut state = self.state.lock().unwrap();
        let id = msg.session;
        let data = msg.data.as_ref();
        let reply = |endpoint, data: Vec<u8>| Message::new(id, endpoint, data);
        let ack = |code: u8| Message::new(id, ACK, vec![code]);

        if msg.endpoint == HANDSHAKE {
            let id = state.next_session;
            state.next_session += 1;
            state.opened += 1;
            return vec![Message::new(id, HANDSHAKE, msg.data.clone())];
        }
        state.commands.push(msg.clone());

        let locked = state.password.is_some() && !state.unlocked.contains(&id);
        match msg.endpoint {
            END => {
                state.ended += 1;
                vec![Message::new(id, END, Bytes::new())]
            }
            ACK => vec![ack(state.ping_ack)],
            CONTROL => match data {
                [0] => vec![reply(CONTROL, vec![locked as u8])],
                [1, password @ ..] => {
                    let ok = state.password.map(str::as_bytes) == Some(password);
                    if ok {
                        state.unlocked.insert(id);
                    }
                    vec![reply(CONTROL, vec![ok as u8])]
                }
                [2] => vec![reply(CONTROL, 256u16.to_le_bytes().to_vec())],
                _ => vec![ack(3)],
            },
            PARAMS | RELAY | METRICS if data.is_empty() => vec![ack(1)],
            _ if data.is_empty() => vec![ack(2)],
            _ if locked => vec![ack(5)],
            PARAMS => state.params_command(data, reply, ack),
            RELAY => match data {
                [0] => vec![reply(RELAY, (1u64 << 2).to_le_bytes().to_vec())],
                [1, 2] => vec![ack(1)],
                _ => vec![ack(3)],
            },
            METRICS => match data {
                [0] => vec![
                    reply(METRICS, b"\x00\x01\x01\x01temp".to_vec()),
                    ack(1),
                ],
                _ => vec![ack(3)],
            },
            _ => vec![ack(2)],
        }
    }
}

impl State {
    fn params_command(
        &mut self,
        data: &[u8],
        reply: impl Fn(u8, Vec<u8>) -> Message,
        ack: impl Fn(u8) -> Message,
    ) -> Vec<Message> {
        match data {
            [2] => {
                let mut out: Vec<Message> = self
                    .params
                    .iter()
                    .map(|p| {
                        let mut buf = vec![p.reference, p.kind, p.mode];
                        buf.extend_from_slice(p.name.as_bytes());
                        reply(PARAMS, buf)
                    })
                    .collect();
                out.push(ack(1));
                out
            }
            [3, reference] => match self.params.iter().find(|p| p.reference == *reference) {
                Some(param) => vec![reply(PARAMS, param.value.clone())],
                None => vec![ack(3)],
            },
            [4, reference, value @ ..] => {
                self.clock += 1;
                let clock = self.clock;
                match self.params.iter_mut().find(|p| p.reference == *reference) {
                    Some(param) => {
                        param.value = value.to_vec();
                        param.age = clock;
                        vec![ack(1)]
                    }
                    None => vec![ack(3)],
                }
            }
            [5, rest @ ..] if rest.len() == 16 => {
                let map = u64::from_le_bytes(rest[..8].try_into().unwrap());
                let since = u64::from_le_bytes(rest[8..].try_into().unwrap());
                let mut out: Vec<Message> = self
                    .params
                    .iter()
                    .filter(|p| map & (1u64 << p.reference) != 0 && p.age > since)
                    .map(|p| {
                        let mut buf = vec![p.reference];
                        buf.extend_from_slice(&p.age.to_le_bytes());
                        buf.extend_from_slice(&p.value);
                        reply(PARAMS, buf)
                    })
                    .collect();
                out.push(ack(1));
                out
            }
            [6, reference] => {
                if let Some(param) = self.params.iter_mut().find(|p| p.reference == *reference) {
                    param.value.clear();
                }
                vec![ack(1)]
            }
            _ => vec![ack(3)],
        }
    }
}
