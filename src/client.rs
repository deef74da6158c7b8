//! RD200 client facade.
//!
//! Turns the single-notification-channel transport into a typed
//! request/response API: one exchange in flight at a time, the first
//! notification resolves it, and the listener is disarmed on every exit path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::platform::Peripheral;
use chrono::{Local, NaiveDateTime};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::Error;
use crate::protocol::packet::{encode_frame, OutboundPacket};
use crate::protocol::registry::{self, Frame};
use crate::protocol::{
    AlarmInterval, AlarmSet, Command, Config, DateTimeSet, FirmwareInfo, LogInfo, Measurement,
    ModuleConfig, ModuleProtection, Packet, ProductProcessMode, Serial, Status, Unit, UnitSet,
};
use crate::transport::{
    default_adapter, scan, BleLink, DiscoveredDevice, GattLink, LinkHandle, TransportError,
};

/// Scan for RD200 devices advertising the radon service.
pub async fn discover(window: Duration) -> Result<Vec<DiscoveredDevice>, Error> {
    let adapter = default_adapter().await?;
    Ok(scan(&adapter, window).await?)
}

/// Client for one RadonEye RD200.
///
/// Callers may share the client across tasks; exchanges are serialized
/// internally, so a second request issued while one is in flight waits for
/// its turn instead of corrupting the pending exchange.
pub struct RadonEye<L: GattLink = BleLink> {
    link: L,
    config: ClientConfig,
    /// One command in flight per device handle.
    exchange: tokio::sync::Mutex<()>,
}

impl RadonEye<BleLink> {
    /// Wrap a discovered peripheral with default timeouts.
    pub fn new(peripheral: Peripheral) -> Self {
        Self::with_config(peripheral, ClientConfig::default())
    }

    pub fn with_config(peripheral: Peripheral, config: ClientConfig) -> Self {
        Self::from_link(BleLink::new(peripheral), config)
    }
}

impl<L: GattLink> RadonEye<L> {
    /// Build a client over any GATT link implementation.
    pub fn from_link(link: L, config: ClientConfig) -> Self {
        Self {
            link,
            config,
            exchange: tokio::sync::Mutex::new(()),
        }
    }

    /// Connect and resolve the radon service.
    pub async fn connect(&self) -> Result<bool, Error> {
        Ok(self.link.connect().await?)
    }

    pub async fn disconnect(&self) -> Result<bool, Error> {
        Ok(self.link.disconnect().await?)
    }

    pub async fn is_connected(&self) -> bool {
        self.link.is_connected().await
    }

    /// Bluetooth address of the device.
    pub fn address(&self) -> String {
        self.link.address()
    }

    /// Execute one command/response exchange.
    ///
    /// When `expected` is given, a response arriving under any other command
    /// code fails with [`Error::WrongPacketType`]. `timeout` defaults to the
    /// configured request timeout.
    pub async fn request(
        &self,
        command: Command,
        expected: Option<Command>,
        timeout: Option<Duration>,
    ) -> Result<Packet, Error> {
        let _guard = self.exchange.lock().await;
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        self.request_unlocked(command, expected, timeout).await
    }

    /// Correlator core. Caller must hold the exchange lock.
    async fn request_unlocked(
        &self,
        command: Command,
        expected: Option<Command>,
        timeout: Duration,
    ) -> Result<Packet, Error> {
        let (tx, rx) = oneshot::channel::<Vec<u8>>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        // Arm before writing so the device cannot respond into a void. The
        // slot is emptied by the first notification; anything after that is
        // dropped.
        let armed = Arc::clone(&slot);
        self.link
            .subscribe(
                LinkHandle::Response,
                Box::new(move |data| match armed.lock() {
                    Ok(mut sender) => match sender.take() {
                        Some(tx) => {
                            let _ = tx.send(data);
                        }
                        None => warn!("received more than one response for a single exchange"),
                    },
                    Err(_) => warn!("response slot poisoned"),
                }),
            )
            .await?;

        let outcome = async {
            self.send_command(command).await?;
            match time::timeout(timeout, rx).await {
                Ok(Ok(buffer)) => Ok(buffer),
                Ok(Err(_)) => Err(Error::Transport(TransportError::ConnectionLost)),
                Err(_) => Err(Error::Timeout(timeout)),
            }
        }
        .await;

        // Disarm on every path. This can fail when the device already
        // disconnected; that must not mask the primary outcome.
        if let Err(err) = self.link.unsubscribe(LinkHandle::Response).await {
            warn!(%err, "failed to disarm response listener");
        }

        let buffer = outcome?;
        let frame = Frame::parse(&buffer)?;
        debug!("<-- (MEAS) {:02x?}", &buffer[..2 + frame.payload.len()]);
        if let Some(expected) = expected {
            if frame.code != expected.code() {
                return Err(Error::WrongPacketType {
                    expected,
                    actual: frame.code,
                });
            }
        }
        registry::decode(frame.code, frame.payload)
    }

    /// Retrieve the stored measurement history.
    ///
    /// History arrives as raw fragments on the log channel rather than one
    /// framed response; fragments accumulate until the byte count announced
    /// by the device is reached. The result is one reading per stored hour,
    /// oldest first, in the device's configured unit.
    pub async fn log(&self) -> Result<Vec<f64>, Error> {
        let _guard = self.exchange.lock().await;

        let info = match self
            .request_unlocked(
                Command::LogInfoQuery,
                Some(Command::LogInfoQuery),
                self.config.request_timeout,
            )
            .await?
        {
            Packet::LogInfo(info) => info,
            other => return Err(mismatched(Command::LogInfoQuery, &other)),
        };

        let expected_len = usize::from(info.data_no) * 2;
        debug!(
            data_no = info.data_no,
            checksum = info.checksum,
            "log transfer start"
        );
        if expected_len == 0 {
            return Ok(Vec::new());
        }

        let buffer = Arc::new(Mutex::new(Vec::with_capacity(expected_len)));
        let (tx, rx) = oneshot::channel::<()>();
        let done = Arc::new(Mutex::new(Some(tx)));

        let sink_buffer = Arc::clone(&buffer);
        let sink_done = Arc::clone(&done);
        self.link
            .subscribe(
                LinkHandle::Log,
                Box::new(move |data| {
                    debug!("<-- (LOG) {:02x?}", data);
                    let mut buffer = match sink_buffer.lock() {
                        Ok(buffer) => buffer,
                        Err(_) => {
                            warn!("log buffer poisoned");
                            return;
                        }
                    };
                    buffer.extend_from_slice(&data);
                    if buffer.len() >= expected_len {
                        if let Ok(mut done) = sink_done.lock() {
                            if let Some(tx) = done.take() {
                                let _ = tx.send(());
                            }
                        }
                    }
                }),
            )
            .await?;

        let outcome = async {
            self.send_command(Command::LogDataSend).await?;
            match time::timeout(self.config.log_timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(Error::Transport(TransportError::ConnectionLost)),
                Err(_) => Err(Error::Timeout(self.config.log_timeout)),
            }
        }
        .await;

        if let Err(err) = self.link.unsubscribe(LinkHandle::Log).await {
            warn!(%err, "failed to disarm log listener");
        }
        outcome?;

        let raw = {
            let mut buffer = buffer
                .lock()
                .map_err(|_| Error::Transport(TransportError::Poisoned))?;
            std::mem::take(&mut *buffer)
        };
        Ok(raw[..expected_len]
            .chunks_exact(2)
            .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])) / 100.0)
            .collect())
    }

    /// Current radon values and pulse counters.
    pub async fn measurement(&self) -> Result<Measurement, Error> {
        match self.query(Command::MeasQuery).await? {
            Packet::Measurement(m) => Ok(m),
            other => Err(mismatched(Command::MeasQuery, &other)),
        }
    }

    /// Device health counters.
    pub async fn status(&self) -> Result<Status, Error> {
        match self.query(Command::StatusQuery).await? {
            Packet::Status(s) => Ok(s),
            other => Err(mismatched(Command::StatusQuery, &other)),
        }
    }

    /// Display unit and alarm settings.
    pub async fn config(&self) -> Result<Config, Error> {
        match self.query(Command::ConfigQuery).await? {
            Packet::Config(c) => Ok(c),
            other => Err(mismatched(Command::ConfigQuery, &other)),
        }
    }

    /// Manufacturing date and serial number.
    pub async fn serial(&self) -> Result<Serial, Error> {
        match self.query(Command::SerialQuery).await? {
            Packet::Serial(s) => Ok(s),
            other => Err(mismatched(Command::SerialQuery, &other)),
        }
    }

    /// Three-character serial type code.
    pub async fn serial_type(&self) -> Result<String, Error> {
        match self.query(Command::SerialTypeQuery).await? {
            Packet::SerialType(t) => Ok(t.value),
            other => Err(mismatched(Command::SerialTypeQuery, &other)),
        }
    }

    /// Device model name.
    pub async fn model_name(&self) -> Result<String, Error> {
        match self.query(Command::ModelNameReturn).await? {
            Packet::ModelName(m) => Ok(m.name),
            other => Err(mismatched(Command::ModelNameReturn, &other)),
        }
    }

    pub async fn firmware_info(&self) -> Result<FirmwareInfo, Error> {
        match self.query(Command::FirmwareQuery).await? {
            Packet::FirmwareInfo(f) => Ok(f),
            other => Err(mismatched(Command::FirmwareQuery, &other)),
        }
    }

    pub async fn module_config(&self) -> Result<ModuleConfig, Error> {
        match self.query(Command::ModuleConfigQuery).await? {
            Packet::ModuleConfig(m) => Ok(m),
            other => Err(mismatched(Command::ModuleConfigQuery, &other)),
        }
    }

    /// Module protection flags. The query and its response ride different
    /// command codes.
    pub async fn module_protection(&self) -> Result<ModuleProtection, Error> {
        let _guard = self.exchange.lock().await;
        match self
            .request_unlocked(
                Command::ModuleProtectionQuery,
                Some(Command::ModuleProtectionReturn),
                self.config.request_timeout,
            )
            .await?
        {
            Packet::ModuleProtection(m) => Ok(m),
            other => Err(mismatched(Command::ModuleProtectionReturn, &other)),
        }
    }

    /// Display calibration factor.
    pub async fn calibration_factor(&self) -> Result<f32, Error> {
        match self.query(Command::DisplayCalFactorQuery).await? {
            Packet::DisplayCalFactor(f) => Ok(f.factor),
            other => Err(mismatched(Command::DisplayCalFactorQuery, &other)),
        }
    }

    pub async fn product_process_mode(&self) -> Result<ProductProcessMode, Error> {
        match self.query(Command::ProductProcessModeQuery).await? {
            Packet::ProductProcessMode(p) => Ok(p),
            other => Err(mismatched(Command::ProductProcessModeQuery, &other)),
        }
    }

    /// Size and checksum of the stored history.
    pub async fn log_info(&self) -> Result<LogInfo, Error> {
        match self.query(Command::LogInfoQuery).await? {
            Packet::LogInfo(info) => Ok(info),
            other => Err(mismatched(Command::LogInfoQuery, &other)),
        }
    }

    /// Set the device clock.
    pub async fn set_date_time(&self, when: NaiveDateTime) -> Result<(), Error> {
        self.send_packet(&DateTimeSet::from(when)).await
    }

    /// Set the device clock from the host's local time.
    pub async fn set_date_time_now(&self) -> Result<(), Error> {
        self.set_date_time(Local::now().naive_local()).await
    }

    /// Select the radon unit shown on the display.
    pub async fn set_unit(&self, unit: Unit) -> Result<(), Error> {
        self.send_packet(&UnitSet { unit }).await
    }

    /// Configure the radon alarm.
    pub async fn set_alarm(
        &self,
        enabled: bool,
        value: f32,
        interval: AlarmInterval,
    ) -> Result<(), Error> {
        self.send_packet(&AlarmSet {
            status: u8::from(enabled),
            value,
            interval,
        })
        .await
    }

    /// Query where the response arrives under the same code as the command.
    async fn query(&self, command: Command) -> Result<Packet, Error> {
        let _guard = self.exchange.lock().await;
        self.request_unlocked(command, Some(command), self.config.request_timeout)
            .await
    }

    /// Write a bare command code. The device takes queries and triggers
    /// without a length byte.
    async fn send_command(&self, command: Command) -> Result<(), Error> {
        let frame = [command.code()];
        debug!("--> (CTL) {:02x?}", frame);
        Ok(self.link.write(LinkHandle::Control, &frame).await?)
    }

    /// Write a framed outbound packet. The device sends no response to sets.
    async fn send_packet<P: OutboundPacket>(&self, packet: &P) -> Result<(), Error> {
        let _guard = self.exchange.lock().await;
        let frame = encode_frame(packet);
        debug!("--> (CTL) {:02x?}", frame);
        Ok(self.link.write(LinkHandle::Control, &frame).await?)
    }
}

fn mismatched(expected: Command, got: &Packet) -> Error {
    Error::WrongPacketType {
        expected,
        actual: got.command().code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NotificationSink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    /// In-memory link: control writes trigger scripted notifications.
    #[derive(Clone)]
    struct MockLink {
        sinks: Arc<Mutex<HashMap<LinkHandle, NotificationSink>>>,
        written: Arc<Mutex<Vec<(LinkHandle, Vec<u8>)>>>,
        /// Response buffers delivered on the response channel, keyed by the
        /// command code that triggers them.
        responses: Arc<Mutex<HashMap<u8, Vec<Vec<u8>>>>>,
        /// Fragments delivered on the log channel when the log dump command
        /// is written.
        log_fragments: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_unsubscribe: Arc<AtomicBool>,
        unsubscribed: Arc<Mutex<Vec<LinkHandle>>>,
    }

    impl MockLink {
        fn new() -> Self {
            Self {
                sinks: Arc::new(Mutex::new(HashMap::new())),
                written: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(HashMap::new())),
                log_fragments: Arc::new(Mutex::new(Vec::new())),
                fail_unsubscribe: Arc::new(AtomicBool::new(false)),
                unsubscribed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn respond(&self, trigger: u8, buffer: Vec<u8>) {
            self.responses
                .lock()
                .unwrap()
                .entry(trigger)
                .or_default()
                .push(buffer);
        }

        fn push_log_fragment(&self, fragment: Vec<u8>) {
            self.log_fragments.lock().unwrap().push(fragment);
        }

        fn deliver(&self, handle: LinkHandle, buffer: Vec<u8>) {
            let mut sinks = self.sinks.lock().unwrap();
            if let Some(sink) = sinks.get_mut(&handle) {
                sink(buffer);
            }
        }

        fn armed(&self) -> Vec<LinkHandle> {
            self.sinks.lock().unwrap().keys().copied().collect()
        }

        fn control_writes(&self) -> Vec<Vec<u8>> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .filter(|(handle, _)| *handle == LinkHandle::Control)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        }
    }

    #[async_trait]
    impl GattLink for MockLink {
        async fn connect(&self) -> Result<bool, TransportError> {
            Ok(true)
        }

        async fn disconnect(&self) -> Result<bool, TransportError> {
            Ok(true)
        }

        async fn is_connected(&self) -> bool {
            true
        }

        fn address(&self) -> String {
            "00:11:22:33:44:55".into()
        }

        async fn write(&self, handle: LinkHandle, bytes: &[u8]) -> Result<(), TransportError> {
            self.written.lock().unwrap().push((handle, bytes.to_vec()));
            if handle != LinkHandle::Control {
                return Ok(());
            }
            let code = bytes[0];
            if code == Command::LogDataSend.code() {
                let fragments: Vec<Vec<u8>> =
                    self.log_fragments.lock().unwrap().drain(..).collect();
                for fragment in fragments {
                    self.deliver(LinkHandle::Log, fragment);
                }
            } else {
                let replies = self.responses.lock().unwrap().remove(&code);
                for reply in replies.unwrap_or_default() {
                    self.deliver(LinkHandle::Response, reply);
                }
            }
            Ok(())
        }

        async fn subscribe(
            &self,
            handle: LinkHandle,
            sink: NotificationSink,
        ) -> Result<(), TransportError> {
            self.sinks.lock().unwrap().insert(handle, sink);
            Ok(())
        }

        async fn unsubscribe(&self, handle: LinkHandle) -> Result<(), TransportError> {
            self.unsubscribed.lock().unwrap().push(handle);
            if self.fail_unsubscribe.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            self.sinks.lock().unwrap().remove(&handle);
            Ok(())
        }
    }

    fn frame(code: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![code, payload.len() as u8];
        buf.extend_from_slice(payload);
        buf
    }

    fn measurement_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&4.2f32.to_le_bytes());
        payload.extend_from_slice(&3.1f32.to_le_bytes());
        payload.extend_from_slice(&2.0f32.to_le_bytes());
        payload.extend_from_slice(&55u16.to_le_bytes());
        payload.extend_from_slice(&5u16.to_le_bytes());
        payload
    }

    fn client(link: MockLink) -> RadonEye<MockLink> {
        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            log_timeout: Duration::from_millis(50),
        };
        RadonEye::from_link(link, config)
    }

    #[tokio::test]
    async fn measurement_resolves_with_the_first_notification() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0x50, frame(0x50, &measurement_payload()));

        let device = client(link.clone());
        let measurement = device.measurement().await.unwrap();
        assert_eq!(measurement.read_value, 4.2);
        assert_eq!(measurement.pulse_count, 55);
        // Listener disarmed after the exchange.
        assert!(link.armed().is_empty());
        // The query went out as a bare command byte.
        assert_eq!(link.control_writes(), vec![vec![0x50]]);
    }

    #[tokio::test]
    async fn excess_notifications_are_dropped() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0x50, frame(0x50, &measurement_payload()));
        // A duplicate with different contents; it must not win.
        let mut other = measurement_payload();
        other[0..4].copy_from_slice(&99.0f32.to_le_bytes());
        link.respond(0x50, frame(0x50, &other));

        let device = client(link.clone());
        let measurement = device.measurement().await.unwrap();
        assert_eq!(measurement.read_value, 4.2);
    }

    #[tokio::test]
    async fn request_times_out_and_disarms_the_listener() {
        init_tracing();
        let link = MockLink::new();

        let device = client(link.clone());
        let err = device.measurement().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(link.armed().is_empty());
        assert_eq!(
            link.unsubscribed.lock().unwrap().as_slice(),
            &[LinkHandle::Response]
        );
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_mask_the_timeout() {
        init_tracing();
        let link = MockLink::new();
        link.fail_unsubscribe.store(true, Ordering::SeqCst);

        let device = client(link.clone());
        let err = device.measurement().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn mismatched_response_code_is_wrong_packet_type() {
        init_tracing();
        let link = MockLink::new();
        let config_payload = [0x01, 0x01, 0x00, 0x00, 0x80, 0x3F, 0x06];
        link.respond(0xAC, frame(0xAC, &config_payload));

        let device = client(link.clone());
        let err = device
            .request(Command::ConfigQuery, Some(Command::MeasQuery), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::WrongPacketType {
                expected: Command::MeasQuery,
                actual: 0xAC,
            }
        ));
    }

    #[tokio::test]
    async fn unregistered_response_code_is_unknown_command() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0x50, frame(0x42, &[0x00]));

        let device = client(link.clone());
        let err = device.request(Command::MeasQuery, None, None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(0x42)));
    }

    #[tokio::test]
    async fn log_reassembles_fragments_into_centi_unit_readings() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0xE8, frame(0xE8, &[0x03, 0x00, 0x7F]));
        link.push_log_fragment(vec![0xE8, 0x03, 0xD0, 0x07]);
        link.push_log_fragment(vec![0x64, 0x00]);

        let device = client(link.clone());
        let readings = device.log().await.unwrap();
        assert_eq!(readings, vec![10.0, 20.0, 1.0]);
        assert!(link.armed().is_empty());
    }

    #[tokio::test]
    async fn empty_history_completes_without_a_transfer() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0xE8, frame(0xE8, &[0x00, 0x00, 0x00]));

        let device = client(link.clone());
        let readings = device.log().await.unwrap();
        assert!(readings.is_empty());
        // Only the log-info query went out; the dump was never requested.
        assert_eq!(link.control_writes(), vec![vec![0xE8]]);
    }

    #[tokio::test]
    async fn log_transfer_times_out_without_enough_fragments() {
        init_tracing();
        let link = MockLink::new();
        link.respond(0xE8, frame(0xE8, &[0x03, 0x00, 0x7F]));
        link.push_log_fragment(vec![0xE8, 0x03]);

        let device = client(link.clone());
        let err = device.log().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(link.armed().is_empty());
    }

    #[tokio::test]
    async fn module_protection_correlates_across_command_codes() {
        init_tracing();
        let link = MockLink::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        link.respond(0xB4, frame(0xB3, &payload));

        let device = client(link.clone());
        let protection = device.module_protection().await.unwrap();
        assert_eq!(protection.protection_status, 1);
        assert_eq!(protection.operation_status, 2);
    }

    #[tokio::test]
    async fn set_unit_writes_a_framed_packet() {
        init_tracing();
        let link = MockLink::new();

        let device = client(link.clone());
        device.set_unit(Unit::BqM3).await.unwrap();
        assert_eq!(link.control_writes(), vec![vec![0xA2, 0x01, 0x01]]);
    }

    #[tokio::test]
    async fn set_alarm_writes_the_packed_layout() {
        init_tracing();
        let link = MockLink::new();

        let device = client(link.clone());
        device
            .set_alarm(true, 1.0, AlarmInterval::OneHour)
            .await
            .unwrap();
        assert_eq!(
            link.control_writes(),
            vec![vec![0xAA, 0x06, 0x01, 0x00, 0x00, 0x80, 0x3F, 0x06]]
        );
    }
}
