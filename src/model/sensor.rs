//! Generic hardware model driven by a [`DeviceDescriptor`].
//!
//! One model answers the framed UART command protocol, serves register files
//! on I2C and SPI, streams periodic frames on every tick and obeys text
//! commands, all according to its descriptor. All mutable state sits behind
//! a single mutex. Replies are written to the bus only after that mutex is
//! released.

use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::devices::{DeviceDescriptor, RegisterProfile, StreamKind};
use super::{HardwareModel, Lifecycle, ModelContext};
use crate::bus::{lock, AddressedBus, BusDevice, BusKind, CommandBus, TimeBus, UartEndpoint};
use crate::config::ConnectionKind;
use crate::data_point::{DataPoint, PointDescriptor, SensorPoint};
use crate::error::{BusError, SimError, StreamError};
use crate::fault::{FaultManager, FaultType};
use crate::protocol::{
    encode_data_frame, encode_hk_frame, scale_to_u16, Access, CommandFrame, DataFrame, FrameAssembler, Opcode,
    RegisterFile,
};
use crate::provider::{point_descriptor, DataProvider, TruthCommand};
use crate::scheduler::{ontime_period, period_from_ms, SchedulePolicy, StreamDescriptor, StreamTable};
use crate::telemetry::{FrameCapture, StreamFrame};

const DEFAULT_COMMAND_BUS: &str = "command";

const HELP: &str = "commands: HELP, ENABLE, DISABLE, RESET, STATUS=<n>, STREAM ON|OFF <name>, \
PERIOD <name> <ms>, LOG <name> [ONCE | ONTIME <s>], UNLOG <name>, UNLOGALL, \
FAULT DEGRADED|FAILED|OFFLINE, CLEAR, QRN|QRL <q1> <q2> <q3> <q4>, \
POINT <x> <y> <z> RADEC <ra> <dec> | WORLD <n> [<lng> <lat> <alt>] | GS <n> | SC <n> [<body> <px> <py> <pz>] | AT <target>, \
STATS, STOP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    pub commands: u64,
    pub frames_received: u64,
    pub frames_ignored: u64,
    pub frames_streamed: u64,
    pub bus_writes: u64,
    pub bus_reads: u64,
    pub provider_errors: u64,
}

struct ModelState {
    lifecycle: Lifecycle,
    provider: Box<dyn DataProvider>,
    streams: StreamTable<StreamKind>,
    framer: FrameAssembler,
    i2c_regs: RegisterFile,
    spi_regs: RegisterFile,
    faults: FaultManager,
    enabled: bool,
    command_count: u32,
    config_word: u32,
    status: u32,
    data_sequence: u32,
    last_good: Option<SensorPoint>,
    last_time: f64,
    stats: ModelStats,
}

impl ModelState {
    /// Count one valid command frame and return the new count.
    fn count_command(&mut self) -> u32 {
        self.command_count = self.command_count.wrapping_add(1);
        self.command_count
    }

    fn pointer(&self, kind: BusKind) -> u8 {
        if kind == BusKind::Spi {
            self.spi_regs.pointer()
        } else {
            self.i2c_regs.pointer()
        }
    }

    fn registers(&mut self, kind: BusKind) -> &mut RegisterFile {
        if kind == BusKind::Spi {
            &mut self.spi_regs
        } else {
            &mut self.i2c_regs
        }
    }
}

#[derive(Default)]
struct Attachments {
    uart: Option<Arc<UartEndpoint>>,
    i2c: Option<(Arc<AddressedBus>, u8)>,
    spi: Option<(Arc<AddressedBus>, u8)>,
    command: Option<(Arc<CommandBus>, String)>,
    time: Option<(Arc<TimeBus>, u64)>,
}

enum Followup {
    None,
    Stop,
    /// Send a one-shot stream frame once the state lock is released.
    Emit { stream: String, time: f64, bytes: Vec<u8> },
}

pub struct SensorModel {
    name: String,
    device: &'static DeviceDescriptor,
    point: PointDescriptor,
    full_scale: f64,
    state: Mutex<ModelState>,
    attachments: Mutex<Attachments>,
    capture: Option<Arc<FrameCapture>>,
}

fn register_file(profile: Option<&RegisterProfile>, field_count: usize) -> RegisterFile {
    let mut regs = RegisterFile::new();
    let Some(profile) = profile else {
        return regs;
    };
    for &(register, access, initial) in profile.registers {
        regs.define(register, access, initial);
    }
    if let Some(base) = profile.live_data_base {
        for offset in 0..(2 * field_count) {
            if let Ok(offset) = u8::try_from(offset) {
                regs.define(base.wrapping_add(offset), Access::ReadOnly, 0);
            }
        }
    }
    regs
}

impl SensorModel {
    /// Build the model, create its data provider and attach it to every
    /// configured bus. The model starts in [`Lifecycle::Constructed`].
    pub fn create(device: &'static DeviceDescriptor, ctx: &ModelContext) -> Result<Arc<Self>, SimError> {
        let config = &ctx.config;
        let provider_key = config
            .data_provider()
            .provider_type
            .unwrap_or_else(|| device.default_provider.to_string());
        let provider = ctx.providers.create(&provider_key, config)?;
        info!("{}: data provider {} created", config.name, provider_key);

        let policy = match config.hardware_model.schedule_policy.as_deref() {
            None => SchedulePolicy::default(),
            Some(name) => SchedulePolicy::parse(name).unwrap_or_else(|| {
                warn!("{}: unknown schedule policy {}, using snap-to-now", config.name, name);
                SchedulePolicy::default()
            }),
        };
        let mut streams = StreamTable::new(policy);
        for stream in &config.hardware_model.default_streams {
            let Some(spec) = device.stream(&stream.name) else {
                error!("{}: {} has no stream named {}", config.name, device.model_type, stream.name);
                continue;
            };
            let start = ctx.common.absolute_start_time + stream.initial_stream_time;
            match streams.add(spec.name, spec.kind, start, period_from_ms(stream.stream_period_ms)) {
                Ok(()) => info!(
                    "{}: stream {} starts at {:.3} every {} ms",
                    config.name, spec.name, start, stream.stream_period_ms
                ),
                Err(e) => error!("{}: {}", config.name, e),
            }
        }

        let point = point_descriptor(config)?;
        let full_scale = config
            .hardware_model
            .extra
            .get("full-scale")
            .and_then(Value::as_f64)
            .unwrap_or(device.full_scale);

        let state = ModelState {
            lifecycle: Lifecycle::Constructed,
            provider,
            streams,
            framer: FrameAssembler::new(),
            i2c_regs: register_file(device.i2c.as_ref(), point.field_count),
            spi_regs: register_file(device.spi.as_ref(), point.field_count),
            faults: FaultManager::new(),
            enabled: true,
            command_count: 0,
            config_word: 0,
            status: 0,
            data_sequence: 0,
            last_good: None,
            last_time: ctx.common.absolute_start_time,
            stats: ModelStats::default(),
        };

        let model = Arc::new(Self {
            name: config.name.clone(),
            device,
            point,
            full_scale,
            state: Mutex::new(state),
            attachments: Mutex::new(Attachments::default()),
            capture: ctx.capture.clone(),
        });
        model.attach(ctx)?;
        Ok(model)
    }

    fn attach(self: &Arc<Self>, ctx: &ModelContext) -> Result<(), SimError> {
        let weak = Arc::downgrade(self);
        let mut attachments = lock(&self.attachments);

        for connection in &ctx.config.hardware_model.connections {
            match connection.kind {
                ConnectionKind::Usart => {
                    if !self.device.uart {
                        warn!("{}: {} has no UART interface, skipping", self.name, self.device.model_type);
                        continue;
                    }
                    if attachments.uart.is_some() {
                        warn!("{}: only the first usart connection is used", self.name);
                        continue;
                    }
                    let port = connection.node_port.unwrap_or(0);
                    let endpoint = Arc::new(ctx.hub.uart_bus(&connection.bus_name).open(port));
                    let model = weak.clone();
                    endpoint.set_handler(Arc::new(move |data: &[u8]| {
                        if let Some(model) = model.upgrade() {
                            model.on_uart_bytes(data);
                        }
                    }));
                    info!("{}: on UART bus {} port {}", self.name, connection.bus_name, port);
                    attachments.uart = Some(endpoint);
                }
                ConnectionKind::I2c | ConnectionKind::Spi => {
                    let (kind, target, profile, slot_taken) = if connection.kind == ConnectionKind::I2c {
                        (BusKind::I2c, connection.address, self.device.i2c.as_ref(), attachments.i2c.is_some())
                    } else {
                        (BusKind::Spi, connection.chip_select, self.device.spi.as_ref(), attachments.spi.is_some())
                    };
                    if profile.is_none() {
                        warn!("{}: {} has no {} interface, skipping", self.name, self.device.model_type, kind);
                        continue;
                    }
                    if slot_taken {
                        warn!("{}: only the first {} connection is used", self.name, kind);
                        continue;
                    }
                    let target = target.ok_or_else(|| {
                        SimError::Config(format!(
                            "{}: {} connection on {} needs {}",
                            self.name,
                            kind,
                            connection.bus_name,
                            if kind == BusKind::I2c { "an address" } else { "a chip-select" }
                        ))
                    })?;
                    let bus = if kind == BusKind::I2c {
                        ctx.hub.i2c_bus(&connection.bus_name)
                    } else {
                        ctx.hub.spi_bus(&connection.bus_name)
                    };
                    bus.attach(target, Arc::new(SlavePort { model: weak.clone(), kind }))?;
                    info!("{}: on {} bus {} at {:#04x}", self.name, kind, connection.bus_name, target);
                    if kind == BusKind::I2c {
                        attachments.i2c = Some((bus, target));
                    } else {
                        attachments.spi = Some((bus, target));
                    }
                }
                ConnectionKind::Command => {
                    if attachments.command.is_some() {
                        warn!("{}: only the first command connection is used", self.name);
                        continue;
                    }
                    let node = connection.node_name.clone().unwrap_or_else(|| self.default_command_node());
                    let bus = ctx.hub.command_bus(&connection.bus_name);
                    bus.register(&node, self.command_handler(weak.clone()))?;
                    info!("{}: command node {} on {}", self.name, node, connection.bus_name);
                    attachments.command = Some((bus, node));
                }
                ConnectionKind::Time => {}
            }
        }

        if attachments.command.is_none() {
            let node = self.default_command_node();
            let bus = ctx.hub.command_bus(DEFAULT_COMMAND_BUS);
            bus.register(&node, self.command_handler(weak.clone()))?;
            info!("{}: command node {} on {}", self.name, node, DEFAULT_COMMAND_BUS);
            attachments.command = Some((bus, node));
        }

        let time = ctx.hub.time();
        let model = weak;
        let id = time.subscribe(Arc::new(move |now| {
            if let Some(model) = model.upgrade() {
                model.on_tick(now);
            }
        }));
        attachments.time = Some((time, id));
        Ok(())
    }

    fn default_command_node(&self) -> String {
        format!("{}-command", self.name)
    }

    fn command_handler(&self, model: Weak<Self>) -> crate::bus::CommandHandler {
        Arc::new(move |message: &str| match model.upgrade() {
            Some(model) => model.on_command(message),
            None => "ERROR: simulator gone".to_string(),
        })
    }

    fn detach_all(&self) {
        let attachments = std::mem::take(&mut *lock(&self.attachments));
        if let Some(endpoint) = attachments.uart {
            endpoint.clear_handler();
        }
        if let Some((bus, target)) = attachments.i2c {
            bus.detach(target);
        }
        if let Some((bus, target)) = attachments.spi {
            bus.detach(target);
        }
        if let Some((bus, node)) = attachments.command {
            bus.unregister(&node);
        }
        if let Some((time, id)) = attachments.time {
            time.unsubscribe(id);
        }
    }

    /// Inbound UART bytes. Frames may arrive split across calls.
    pub fn on_uart_bytes(&self, data: &[u8]) {
        let replies = {
            let mut state = lock(&self.state);
            if state.lifecycle != Lifecycle::Running {
                debug!("{}: not running, {} UART bytes dropped", self.name, data.len());
                return;
            }
            if state.faults.active_fault() == Some(FaultType::Offline) {
                debug!("{}: offline, {} UART bytes dropped", self.name, data.len());
                return;
            }
            debug!("{}: REQUEST {}", self.name, hex::encode(data));
            let frames = state.framer.push(data);
            let mut replies = Vec::new();
            for frame in &frames {
                self.handle_frame(&mut state, frame, &mut replies);
            }
            replies
        };
        for reply in &replies {
            debug!("{}: REPLY {}", self.name, hex::encode(reply));
        }
        self.send_uart(&replies);
    }

    fn handle_frame(&self, state: &mut ModelState, frame: &CommandFrame, replies: &mut Vec<Vec<u8>>) {
        state.stats.frames_received += 1;
        if self.device.gated && !state.enabled {
            debug!("{}: disabled, ignoring {:?}", self.name, frame.opcode);
            state.stats.frames_ignored += 1;
            return;
        }

        let mut echo = frame.raw;
        let mut reply = None;
        match frame.opcode {
            Opcode::Unknown(code) => {
                warn!("{}: unknown opcode {:#04x} acknowledged", self.name, code);
                replies.push(echo.to_vec());
                return;
            }
            Opcode::Noop => {
                state.count_command();
            }
            Opcode::Housekeeping => {
                let count = state.count_command();
                reply = Some(encode_hk_frame(count, state.config_word, state.status).to_vec());
            }
            Opcode::Data => {
                state.count_command();
                reply = Some(self.data_frame(state).to_vec());
            }
            Opcode::Config => {
                state.count_command();
                state.config_word = frame.param;
                debug!("{}: configuration {:#010x}", self.name, frame.param);
            }
            Opcode::StreamPeriod => {
                state.count_command();
                let applied = match self.device.primary_stream() {
                    Some(spec) if frame.param > 0 => state.streams.set_period(spec.name, period_from_ms(frame.param)),
                    Some(spec) => Err(StreamError::InvalidPeriod(spec.name.to_string())),
                    None => Err(StreamError::Unknown("data".to_string())),
                };
                match applied {
                    Ok(()) => debug!("{}: stream period now {} ms", self.name, frame.param),
                    Err(e) => {
                        warn!("{}: stream period rejected: {}", self.name, e);
                        echo[3..7].fill(0);
                    }
                }
            }
        }
        replies.push(echo.to_vec());
        if let Some(reply) = reply {
            replies.push(reply);
        }
    }

    fn send_uart(&self, chunks: &[Vec<u8>]) {
        if chunks.is_empty() {
            return;
        }
        let endpoint = lock(&self.attachments).uart.clone();
        if let Some(endpoint) = endpoint {
            for chunk in chunks {
                endpoint.send(chunk);
            }
        }
    }

    /// The point the device reports right now, with faults applied and
    /// provider failures replaced by the last good value.
    fn fetch_point(&self, state: &mut ModelState) -> SensorPoint {
        match state.faults.active_fault() {
            Some(FaultType::Failed) => return SensorPoint::neutral(self.point.clone()),
            Some(FaultType::Degraded) => {
                return state
                    .last_good
                    .clone()
                    .unwrap_or_else(|| SensorPoint::neutral(self.point.clone()));
            }
            Some(FaultType::Offline) | None => {}
        }
        match state.provider.data_point() {
            Ok(point) => {
                if point.is_valid() {
                    state.last_good = Some(point.clone());
                }
                point
            }
            Err(e) => {
                state.stats.provider_errors += 1;
                warn!("{}: data provider failed: {}", self.name, e);
                state
                    .last_good
                    .clone()
                    .unwrap_or_else(|| SensorPoint::neutral(self.point.clone()))
            }
        }
    }

    fn encoded_fields(&self, point: &SensorPoint) -> Vec<u16> {
        point.values().iter().map(|v| scale_to_u16(*v, self.full_scale)).collect()
    }

    fn data_frame(&self, state: &mut ModelState) -> DataFrame {
        let point = self.fetch_point(state);
        state.data_sequence = state.data_sequence.wrapping_add(1);
        trace!("{}: data point {}", self.name, point);
        encode_data_frame(state.data_sequence, &self.encoded_fields(&point))
    }

    fn stream_frame(&self, state: &mut ModelState, kind: StreamKind) -> Vec<u8> {
        match kind {
            StreamKind::Data => self.data_frame(state).to_vec(),
            StreamKind::Housekeeping => encode_hk_frame(state.command_count, state.config_word, state.status).to_vec(),
        }
    }

    /// Why stream frames cannot go out right now, if they cannot.
    fn streaming_blocked(&self, state: &ModelState) -> Option<&'static str> {
        if state.faults.active_fault() == Some(FaultType::Offline) {
            Some("ERROR: device is offline")
        } else if self.device.gated && !state.enabled {
            Some("DISABLED")
        } else {
            None
        }
    }

    /// Unsolicited stream frame out on the data bus and into the capture.
    fn emit(&self, stream: String, time: f64, bytes: Vec<u8>) {
        trace!("{}: stream {} -> {}", self.name, stream, hex::encode(&bytes));
        self.send_uart(std::slice::from_ref(&bytes));
        if let Some(capture) = &self.capture {
            capture.publish(StreamFrame {
                model: self.name.clone(),
                stream,
                time,
                bytes,
            });
        }
    }

    /// `LOG [COMn] <name> [ONCE | ONTIME <period>]`
    fn log_command(&self, state: &mut ModelState, args: &[&str]) -> (String, Followup) {
        let args = match args {
            [port, rest @ ..] if port.starts_with("COM") => rest,
            _ => args,
        };
        let Some((name, trigger)) = args.split_first() else {
            return ("INVALID MESSAGE ID".to_string(), Followup::None);
        };
        let Some(spec) = self.device.stream(name) else {
            warn!("{}: LOG of unknown stream {}", self.name, name);
            return ("INVALID MESSAGE ID".to_string(), Followup::None);
        };
        let reply = match trigger {
            [] | ["ONCE"] => {
                if let Some(blocked) = self.streaming_blocked(state) {
                    return (blocked.to_string(), Followup::None);
                }
                let bytes = self.stream_frame(state, spec.kind);
                state.stats.frames_streamed += 1;
                let followup = Followup::Emit { stream: spec.name.to_string(), time: state.last_time, bytes };
                return ("OK".to_string(), followup);
            }
            ["ONTIME", period] => match ontime_period(period) {
                Some(period) => {
                    let now = state.last_time;
                    match state.streams.add(spec.name, spec.kind, now, period) {
                        Ok(()) => {
                            info!("{}: stream {} every {} s from {:.3}", self.name, spec.name, period, now);
                            "OK".to_string()
                        }
                        Err(StreamError::Duplicate(_)) => "TRIGGER ALREADY EXISTS".to_string(),
                        Err(e) => format!("ERROR: {e}"),
                    }
                }
                None => "REQUESTED RATE IS INVALID".to_string(),
            },
            _ => "INVALID MESSAGE ID".to_string(),
        };
        (reply, Followup::None)
    }

    fn check_addressable(&self, state: &ModelState) -> Result<(), BusError> {
        if state.lifecycle != Lifecycle::Running || state.faults.active_fault() == Some(FaultType::Offline) {
            return Err(BusError::Offline);
        }
        Ok(())
    }

    fn profile(&self, kind: BusKind) -> Option<&'static RegisterProfile> {
        match kind {
            BusKind::I2c => self.device.i2c.as_ref(),
            BusKind::Spi => self.device.spi.as_ref(),
            BusKind::Uart | BusKind::Command => None,
        }
    }

    pub fn on_bus_write(&self, kind: BusKind, data: &[u8]) -> Result<(), BusError> {
        let profile = self.profile(kind).ok_or(BusError::Unsupported(kind))?;
        let mut state = lock(&self.state);
        self.check_addressable(&state)?;
        state.stats.bus_writes += 1;
        state.registers(kind).handle_write(profile.style, data);
        Ok(())
    }

    pub fn on_bus_read(&self, kind: BusKind, buf: &mut [u8]) -> Result<usize, BusError> {
        let profile = self.profile(kind).ok_or(BusError::Unsupported(kind))?;
        let mut state = lock(&self.state);
        self.check_addressable(&state)?;
        state.stats.bus_reads += 1;
        let pointer = usize::from(state.pointer(kind));
        let live_base = profile.live_data_base.filter(|&base| {
            let live = usize::from(base)..usize::from(base) + 2 * self.point.field_count;
            pointer < live.end && pointer + buf.len() > live.start
        });
        if let Some(base) = live_base {
            let point = self.fetch_point(&mut state);
            let bytes: Vec<u8> = self.encoded_fields(&point).iter().flat_map(|f| f.to_be_bytes()).collect();
            state.registers(kind).load(base, &bytes);
        }
        Ok(state.registers(kind).read_into(buf))
    }

    fn run_command(&self, state: &mut ModelState, command: &str) -> (String, Followup) {
        let words: Vec<&str> = command.split_whitespace().collect();
        let reply = match words.as_slice() {
            ["HELP"] => HELP.to_string(),
            ["ENABLE"] => {
                state.enabled = true;
                "ENABLED".to_string()
            }
            ["DISABLE"] => {
                state.enabled = false;
                state.command_count = 0;
                state.config_word = 0;
                state.status = 0;
                "DISABLED".to_string()
            }
            ["RESET"] => {
                state.command_count = 0;
                state.data_sequence = 0;
                state.framer.reset();
                "RESET".to_string()
            }
            [status] if status.starts_with("STATUS=") => match status["STATUS=".len()..].parse::<u32>() {
                Ok(value) => {
                    state.status = value;
                    "STATUS SET".to_string()
                }
                Err(_) => "STATUS INVALID".to_string(),
            },
            ["STREAM", switch @ ("ON" | "OFF"), name] => {
                let name = self.canonical_stream(name);
                match state.streams.set_enabled(name, *switch == "ON") {
                    Ok(()) => format!("STREAM {name} {switch}"),
                    Err(e) => format!("ERROR: {e}"),
                }
            }
            ["PERIOD", name, ms] => match ms.parse::<u32>() {
                Ok(ms) => match state.streams.set_period(self.canonical_stream(name), period_from_ms(ms)) {
                    Ok(()) => format!("PERIOD {name} {ms} MS"),
                    Err(e) => format!("ERROR: {e}"),
                },
                Err(_) => format!("ERROR: {ms} is not a period in milliseconds"),
            },
            ["FAULT", kind] => match FaultType::parse(kind) {
                Some(fault) => {
                    let now = state.last_time;
                    state.faults.inject(fault, now);
                    format!("FAULT {} ACTIVE", fault.as_str())
                }
                None => format!("ERROR: unknown fault {kind}"),
            },
            ["CLEAR"] => {
                let now = state.last_time;
                match state.faults.clear(now) {
                    Some(fault) => format!("FAULT {} CLEARED", fault.as_str()),
                    None => "NO ACTIVE FAULT".to_string(),
                }
            }
            [op @ ("QRN" | "QRL"), q1, q2, q3, q4] => {
                let parsed: Result<Vec<f64>, _> = [q1, q2, q3, q4].iter().map(|q| q.parse::<f64>()).collect();
                match parsed {
                    Ok(q) => {
                        let quaternion = [q[0], q[1], q[2], q[3]];
                        let command = if *op == "QRN" {
                            TruthCommand::QuaternionQrn(quaternion)
                        } else {
                            TruthCommand::QuaternionQrl(quaternion)
                        };
                        state.provider.forward_command(&command);
                        format!("{op} FORWARDED")
                    }
                    Err(_) => format!("ERROR: {op} needs four numbers"),
                }
            }
            ["LOG", args @ ..] => return self.log_command(state, args),
            ["UNLOG", args @ ..] => match args {
                [port, name] if port.starts_with("COM") => self.unlog(state, name),
                [name] => self.unlog(state, name),
                _ => "INVALID MESSAGE ID".to_string(),
            },
            ["UNLOGALL"] | ["UNLOGALL", _] => {
                let removed = state.streams.clear();
                info!("{}: {} streams removed", self.name, removed);
                "OK".to_string()
            }
            ["POINT", x, y, z, target @ ..] => {
                let vector = [x, y, z].map(|v| v.parse::<f64>());
                match vector {
                    [Ok(x), Ok(y), Ok(z)] => match point_command([x, y, z], target) {
                        Some(command) => {
                            state.provider.forward_command(&command);
                            "POINT FORWARDED".to_string()
                        }
                        None => "ERROR: POINT needs RADEC, WORLD, GS, SC or AT and its arguments".to_string(),
                    },
                    _ => "ERROR: POINT needs three vector components".to_string(),
                }
            }
            ["STATS"] => serde_json::to_string(&state.stats).unwrap_or_else(|e| format!("ERROR: {e}")),
            ["STOP"] | ["STOP", _] => return ("STOPPING".to_string(), Followup::Stop),
            _ => "INVALID COMMAND (try HELP)".to_string(),
        };
        (reply, Followup::None)
    }

    /// Device-table spelling of a stream name.
    fn canonical_stream<'a>(&self, name: &'a str) -> &'a str {
        self.device.stream(name).map_or(name, |spec| spec.name)
    }

    /// Removing a stream that is not logged is not an error.
    fn unlog(&self, state: &mut ModelState, name: &str) -> String {
        let canonical = self.canonical_stream(name);
        if state.streams.remove(canonical).is_ok() {
            info!("{}: stream {} removed", self.name, canonical);
        } else {
            debug!("{}: UNLOG {} with no such stream", self.name, name);
        }
        "OK".to_string()
    }

    pub fn get_stats(&self) -> ModelStats {
        lock(&self.state).stats.clone()
    }

    pub fn stream(&self, name: &str) -> Option<StreamDescriptor<StreamKind>> {
        lock(&self.state).streams.get(self.canonical_stream(name)).cloned()
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn active_fault(&self) -> Option<FaultType> {
        lock(&self.state).faults.active_fault()
    }

    pub fn command_count(&self) -> u32 {
        lock(&self.state).command_count
    }

    pub fn device(&self) -> &'static DeviceDescriptor {
        self.device
    }
}

impl HardwareModel for SensorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_type(&self) -> &str {
        self.device.model_type
    }

    fn lifecycle(&self) -> Lifecycle {
        lock(&self.state).lifecycle
    }

    fn start(&self) -> Result<(), SimError> {
        let mut state = lock(&self.state);
        match state.lifecycle {
            Lifecycle::Constructed => {
                state.lifecycle = Lifecycle::Running;
                info!("{}: {} running", self.name, self.device.model_type);
                Ok(())
            }
            Lifecycle::Running => Ok(()),
            Lifecycle::Stopped => Err(SimError::Stopped(self.name.clone())),
        }
    }

    fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
        }
        self.detach_all();
        info!("{}: stopped", self.name);
    }

    fn on_command(&self, message: &str) -> String {
        let command = message.trim().to_ascii_uppercase();
        info!("{}: command {:?}", self.name, command);
        let (reply, followup) = {
            let mut state = lock(&self.state);
            state.stats.commands += 1;
            self.run_command(&mut state, &command)
        };
        match followup {
            Followup::None => {}
            Followup::Stop => self.stop(),
            Followup::Emit { stream, time, bytes } => self.emit(stream, time, bytes),
        }
        reply
    }

    fn on_tick(&self, time: f64) {
        let mut frames = Vec::new();
        {
            let mut state = lock(&self.state);
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            state.last_time = time;
            if self.streaming_blocked(&state).is_some() {
                return;
            }
            for fired in state.streams.due(time) {
                let bytes = self.stream_frame(&mut state, fired.generator);
                state.stats.frames_streamed += 1;
                frames.push((fired.name, bytes));
            }
        }

        for (stream, bytes) in frames {
            self.emit(stream, time, bytes);
        }
    }
}

impl Drop for SensorModel {
    fn drop(&mut self) {
        self.detach_all();
    }
}

/// Pointing target after `POINT <x> <y> <z>`.
fn point_command(vector: [f64; 3], target: &[&str]) -> Option<TruthCommand> {
    let float = |text: &str| text.parse::<f64>().ok();
    let int = |text: &str| text.parse::<u32>().ok();
    let command = match target {
        ["RADEC", ra, dec] => TruthCommand::VectorRaDec { vector, ra: float(ra)?, dec: float(dec)? },
        ["WORLD", world] => TruthCommand::VectorWorld { vector, world: int(world)? },
        ["WORLD", world, lng, lat, alt] => TruthCommand::VectorWorldLngLatAlt {
            vector,
            world: int(world)?,
            lng: float(lng)?,
            lat: float(lat)?,
            alt: float(alt)?,
        },
        ["GS", station] => TruthCommand::VectorGroundStation { vector, station: int(station)? },
        ["SC", spacecraft] => TruthCommand::VectorSc { vector, spacecraft: int(spacecraft)? },
        ["SC", spacecraft, body, px, py, pz] => TruthCommand::VectorScPoint {
            vector,
            spacecraft: int(spacecraft)?,
            body: int(body)?,
            point: [float(px)?, float(py)?, float(pz)?],
        },
        ["AT", target] => TruthCommand::VectorPointAt { vector, target: (*target).to_string() },
        _ => return None,
    };
    Some(command)
}

/// Slave-side adapter registered on an addressed bus.
struct SlavePort {
    model: Weak<SensorModel>,
    kind: BusKind,
}

impl BusDevice for SlavePort {
    fn bus_write(&self, data: &[u8]) -> Result<(), BusError> {
        self.model.upgrade().ok_or(BusError::Offline)?.on_bus_write(self.kind, data)
    }

    fn bus_read(&self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.model.upgrade().ok_or(BusError::Offline)?.on_bus_read(self.kind, buf)
    }
}
