use hilsim::bus::{BusConnection, BusHub, BusKind};
use hilsim::config::{CommonConfig, ConnectionConfig, ConnectionKind, DataProviderConfig, SimulatorConfig, StreamConfig};
use hilsim::error::BusError;
use hilsim::model::HardwareModel;
use hilsim::protocol::{decode_data_frame, encode_command, encode_hk_frame, scale_to_u16, Opcode, COMMAND_FRAME_LEN};
use std::sync::Arc;

fn common() -> CommonConfig {
    CommonConfig {
        absolute_start_time: 0.0,
        sim_microseconds_per_tick: 500_000,
        real_microseconds_per_tick: 1_000,
    }
}

fn connection(kind: ConnectionKind, bus_name: &str) -> ConnectionConfig {
    ConnectionConfig {
        kind,
        bus_name: bus_name.to_string(),
        node_port: None,
        address: None,
        chip_select: None,
        node_name: None,
    }
}

fn synthetic() -> Option<DataProviderConfig> {
    Some(DataProviderConfig {
        provider_type: Some("SYNTHETIC".to_string()),
        ..Default::default()
    })
}

fn mag_config() -> SimulatorConfig {
    let mut config = SimulatorConfig::new("mag", "GENERIC_MAG");
    config.hardware_model.data_provider = synthetic();
    let mut uart = connection(ConnectionKind::Usart, "usart_29");
    uart.node_port = Some(29);
    let mut i2c = connection(ConnectionKind::I2c, "i2c_2");
    i2c.address = Some(30);
    config.hardware_model.connections = vec![uart, i2c];
    config.hardware_model.default_streams = vec![StreamConfig {
        name: "MAG".to_string(),
        initial_stream_time: 1.0,
        stream_period_ms: 1000,
    }];
    config
}

fn start(hub: &Arc<BusHub>, config: &SimulatorConfig) -> Arc<dyn HardwareModel> {
    let model = hilsim::plugins::global().create_model(config, &common(), hub, None).unwrap();
    model.start().unwrap();
    model
}

#[test]
fn test_mag_streams_data_frames_on_schedule() {
    let hub = Arc::new(BusHub::new(common()));
    let _mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::Uart, "usart_29", "29").unwrap();

    // Ticks land at 0.5, 1.0 and 1.5 s; the first period ends at 2.0 s.
    for _ in 0..3 {
        hub.time().advance();
    }
    assert!(fsw.take_unsolicited().is_empty());

    hub.time().advance();
    let frame = fsw.take_unsolicited();
    let (sequence, fields) = decode_data_frame(&frame).unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(fields, vec![scale_to_u16(0.001, 1.0), scale_to_u16(0.002, 1.0), scale_to_u16(0.003, 1.0)]);

    hub.time().advance();
    assert!(fsw.take_unsolicited().is_empty());
    hub.time().advance();
    let (sequence, _) = decode_data_frame(&fsw.take_unsolicited()).unwrap();
    assert_eq!(sequence, 2);
}

#[test]
fn test_mag_stream_period_command() {
    let hub = Arc::new(BusHub::new(common()));
    let mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::Uart, "usart_29", "29").unwrap();
    let mut rbuf = [0u8; 64];

    let command = encode_command(Opcode::StreamPeriod, 250);
    assert_eq!(fsw.transact(&command, &mut rbuf), Ok(COMMAND_FRAME_LEN));
    assert_eq!(&rbuf[..COMMAND_FRAME_LEN], &command);

    // Zero is rejected and the echo carries the zeroed parameter.
    let n = fsw.transact(&encode_command(Opcode::StreamPeriod, 0), &mut rbuf).unwrap();
    assert_eq!(&rbuf[..n], &encode_command(Opcode::StreamPeriod, 0));

    assert_eq!(mag.on_command("PERIOD MAG 500"), "PERIOD MAG 500 MS");
    assert_eq!(mag.on_command("PERIOD GYRO 500"), "ERROR: stream GYRO does not exist");
}

#[test]
fn test_mag_frames_split_across_writes() {
    let hub = Arc::new(BusHub::new(common()));
    let _mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::Uart, "usart_29", "29").unwrap();
    let command = encode_command(Opcode::Data, 0);

    fsw.write(&[0x00, 0x11]).unwrap();
    fsw.write(&command[..4]).unwrap();
    assert!(fsw.take_unsolicited().is_empty());
    fsw.write(&command[4..]).unwrap();

    let reply = fsw.take_unsolicited();
    assert_eq!(&reply[..COMMAND_FRAME_LEN], &command);
    let (sequence, fields) = decode_data_frame(&reply[COMMAND_FRAME_LEN..]).unwrap();
    assert_eq!(sequence, 1);
    assert_eq!(fields.len(), 3);
}

#[test]
fn test_mag_i2c_identity_and_live_registers() {
    let hub = Arc::new(BusHub::new(common()));
    let _mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::I2c, "i2c_2", "0x1e").unwrap();

    let mut id = [0u8; 1];
    fsw.transact(&[0x00], &mut id).unwrap();
    assert_eq!(id, [0x4D]);

    let mut data = [0u8; 6];
    assert_eq!(fsw.transact(&[0x01], &mut data), Ok(6));
    let x = u16::from_be_bytes([data[0], data[1]]);
    let z = u16::from_be_bytes([data[4], data[5]]);
    assert_eq!(x, scale_to_u16(0.001, 1.0));
    assert_eq!(z, scale_to_u16(0.003, 1.0));

    // Live registers are read-only.
    fsw.write(&[0x01, 0xFF, 0xFF]).unwrap();
    fsw.transact(&[0x01], &mut data).unwrap();
    assert_eq!(u16::from_be_bytes([data[0], data[1]]), scale_to_u16(0.002, 1.0));
}

#[test]
fn test_faults_change_what_the_bus_sees() {
    let hub = Arc::new(BusHub::new(common()));
    let mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::I2c, "i2c_2", "30").unwrap();
    let mut first = [0u8; 6];
    fsw.transact(&[0x01], &mut first).unwrap();

    assert_eq!(mag.on_command("FAULT DEGRADED"), "FAULT DEGRADED ACTIVE");
    let mut frozen = [0u8; 6];
    fsw.transact(&[0x01], &mut frozen).unwrap();
    assert_eq!(frozen, first);

    mag.on_command("FAULT FAILED");
    fsw.transact(&[0x01], &mut frozen).unwrap();
    assert_eq!(frozen, [0x80, 0x00, 0x80, 0x00, 0x80, 0x00]);

    mag.on_command("FAULT OFFLINE");
    assert_eq!(fsw.transact(&[0x01], &mut frozen), Err(BusError::Offline));

    mag.on_command("CLEAR");
    assert!(fsw.transact(&[0x01], &mut frozen).is_ok());
}

#[test]
fn test_sample_gate_and_housekeeping() {
    let hub = Arc::new(BusHub::new(common()));
    let mut config = SimulatorConfig::new("sample", "SAMPLE");
    let mut uart = connection(ConnectionKind::Usart, "usart_16");
    uart.node_port = Some(16);
    config.hardware_model.connections.push(uart);
    let sample = start(&hub, &config);
    let mut fsw = hub.connect(BusKind::Uart, "usart_16", "16").unwrap();
    let mut rbuf = [0u8; 64];

    fsw.transact(&encode_command(Opcode::Config, 0xCAFE_F00D), &mut rbuf).unwrap();
    let n = fsw.transact(&encode_command(Opcode::Housekeeping, 0), &mut rbuf).unwrap();
    assert_eq!(n, COMMAND_FRAME_LEN + 16);
    let hk = &rbuf[COMMAND_FRAME_LEN..n];
    assert_eq!(&hk[..2], &[0xDE, 0xAD]);
    assert_eq!(u32::from_be_bytes([hk[2], hk[3], hk[4], hk[5]]), 2);
    assert_eq!(u32::from_be_bytes([hk[6], hk[7], hk[8], hk[9]]), 0xCAFE_F00D);
    assert_eq!(&hk[14..], &[0xBE, 0xEF]);

    assert_eq!(sample.on_command("DISABLE"), "DISABLED");
    assert_eq!(fsw.transact(&encode_command(Opcode::Housekeeping, 0), &mut rbuf), Ok(0));
    sample.on_command("ENABLE");
    let n = fsw.transact(&encode_command(Opcode::Housekeeping, 0), &mut rbuf).unwrap();
    let hk = &rbuf[COMMAND_FRAME_LEN..n];
    assert_eq!(u32::from_be_bytes([hk[2], hk[3], hk[4], hk[5]]), 1);
    assert_eq!(u32::from_be_bytes([hk[6], hk[7], hk[8], hk[9]]), 0);
}

#[test]
fn test_camera_spi_register_file() {
    let hub = Arc::new(BusHub::new(common()));
    let mut config = SimulatorConfig::new("cam", "CAMERA");
    let mut spi = connection(ConnectionKind::Spi, "spi_0");
    spi.chip_select = Some(1);
    config.hardware_model.connections.push(spi);
    let _camera = start(&hub, &config);
    let mut fsw = hub.connect(BusKind::Spi, "spi_0", "1").unwrap();
    let mut byte = [0u8; 1];

    fsw.transact(&[0x40], &mut byte).unwrap();
    assert_eq!(byte, [0x40]);
    fsw.transact(&[0x41], &mut byte).unwrap();
    assert_eq!(byte, [0x08]);

    fsw.write(&[0x80 | 0x01, 0x5A]).unwrap();
    fsw.transact(&[0x01], &mut byte).unwrap();
    assert_eq!(byte, [0x5A]);

    // Writes to read-only registers are ignored; undefined registers read zero.
    fsw.write(&[0x80 | 0x40, 0x99]).unwrap();
    fsw.transact(&[0x40], &mut byte).unwrap();
    assert_eq!(byte, [0x40]);
    fsw.transact(&[0x20], &mut byte).unwrap();
    assert_eq!(byte, [0x00]);
}

#[test]
fn test_missing_address_is_a_config_error() {
    let hub = Arc::new(BusHub::new(common()));
    let mut config = SimulatorConfig::new("cam", "CAMERA");
    config.hardware_model.connections.push(connection(ConnectionKind::I2c, "i2c_1"));
    let result = hilsim::plugins::global().create_model(&config, &common(), &hub, None);
    assert!(matches!(result, Err(hilsim::SimError::Config(_))));
    assert!(hub.command_bus("command").nodes().is_empty());
}

#[test]
fn test_two_models_share_a_bus() {
    let hub = Arc::new(BusHub::new(common()));
    let mut first = SimulatorConfig::new("cam-a", "CAMERA");
    let mut second = SimulatorConfig::new("cam-b", "CAMERA");
    for (config, address) in [(&mut first, 0x30), (&mut second, 0x31)] {
        let mut i2c = connection(ConnectionKind::I2c, "i2c_1");
        i2c.address = Some(address);
        config.hardware_model.connections.push(i2c);
    }
    let _a = start(&hub, &first);
    let b = start(&hub, &second);
    assert_eq!(hub.i2c_bus("i2c_1").attached(), vec![0x30, 0x31]);

    b.stop();
    assert_eq!(hub.i2c_bus("i2c_1").attached(), vec![0x30]);
    let mut gone = hub.connect(BusKind::I2c, "i2c_1", "0x31").unwrap();
    let mut byte = [0u8; 1];
    assert!(matches!(gone.transact(&[0x0A], &mut byte), Err(BusError::NoDevice { .. })));
}

#[test]
fn test_mag_unknown_opcode_is_echoed_and_not_counted() {
    let hub = Arc::new(BusHub::new(common()));
    let _mag = start(&hub, &mag_config());
    let mut fsw = hub.connect(BusKind::Uart, "usart_29", "29").unwrap();
    let mut rbuf = [0u8; 64];

    let unknown = encode_command(Opcode::Unknown(0x42), 5);
    assert_eq!(fsw.transact(&unknown, &mut rbuf), Ok(COMMAND_FRAME_LEN));
    assert_eq!(&rbuf[..COMMAND_FRAME_LEN], &unknown);

    let n = fsw.transact(&encode_command(Opcode::Housekeeping, 0), &mut rbuf).unwrap();
    assert_eq!(&rbuf[COMMAND_FRAME_LEN..n], &encode_hk_frame(1, 0, 0));
    let n = fsw.transact(&encode_command(Opcode::Data, 0), &mut rbuf).unwrap();
    assert_eq!(decode_data_frame(&rbuf[COMMAND_FRAME_LEN..n]).unwrap().0, 1);
}
