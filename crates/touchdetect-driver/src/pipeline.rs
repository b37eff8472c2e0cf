//! 设备轮询循环
//!
//! 每个已连接设备由一个工作线程运行其中一个循环：
//!
//! - [`can_loop`]: USB-CAN 适配器，被动接收 22 字节帧并重组数据包
//! - [`serial_loop`]: HDLC 串口设备，请求/应答式轮询
//! - [`wsg_loop`]: WSG 夹爪，每个周期依次请求左右两侧
//!
//! 循环只调用协议层的纯函数，把结果写入 [`DeviceState`] 并触发事件。
//! `is_running` 变为 false 时返回 `Ok(())`；同步失败、连续超时或传输错误时
//! 返回 `Err`，由调用方（service）负责状态转换和事件通知。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};
use touchdetect_protocol::can::{FRAME_SIZE, PACKAGE_SIZE};
use touchdetect_protocol::hdlc::{self, FrameKind};
use touchdetect_protocol::wsg::RESPONSE_MIN_LEN;
use touchdetect_protocol::{
    CanPackageDecoder, FrameExtractor, SensorSide, TaxelArray, WsgCodec, to_taxel_array,
};
use touchdetect_transport::ByteTransport;

use crate::DriverError;
use crate::config::{CanConfig, SerialConfig, WsgConfig};
use crate::device::DeviceState;
use crate::event::{DeviceEvent, EventDispatcher};
use crate::heartbeat::ConnectionMonitor;

/// 循环共享的上下文
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub device: Arc<DeviceState>,
    pub events: Arc<EventDispatcher>,
    /// 运行标志（用于生命周期联动）
    pub is_running: Arc<AtomicBool>,
}

impl LoopContext {
    pub fn new(device: Arc<DeviceState>, events: Arc<EventDispatcher>) -> Self {
        Self {
            device,
            events,
            is_running: Arc::new(AtomicBool::new(true)),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 写入单传感器数据并触发 `NewData`
    fn publish(&self, array: TaxelArray) {
        match self.device.set_taxels(array) {
            Ok(array) => {
                self.events.fire(self.device.id(), &DeviceEvent::NewData(array));
            },
            Err(_) => self.device.record_dropped_frame(),
        }
    }

    /// 写入夹爪左右两侧数据并触发 `NewGripperData`
    fn publish_gripper(&self, left: TaxelArray, right: TaxelArray) {
        match self.device.set_gripper_taxels(left, right) {
            Ok((left, right)) => {
                self.events
                    .fire(self.device.id(), &DeviceEvent::NewGripperData { left, right });
            },
            Err(_) => self.device.record_dropped_frame(),
        }
    }
}

/// 等到 `deadline`（已过期则立即返回）
fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        spin_sleep::sleep(deadline - now);
    }
}

/// CAN 接收循环
///
/// 适配器持续推送数据，这里只负责读和重组。
/// 超过 `silence_timeout` 没有任何字节时返回 [`DriverError::ConnectionTimeout`]。
pub fn can_loop<T: ByteTransport + ?Sized>(
    transport: &mut T,
    ctx: &LoopContext,
    config: &CanConfig,
) -> Result<(), DriverError> {
    transport.set_read_timeout(config.read_timeout())?;

    let mut decoder =
        CanPackageDecoder::with_limits(config.max_sync_attempts, config.max_invalid_frames);
    let monitor = ConnectionMonitor::new(config.silence_timeout());
    let mut buf = [0u8; FRAME_SIZE * PACKAGE_SIZE];

    debug!("Device {}: CAN loop started", ctx.device.id());

    while ctx.is_running() {
        let n = match transport.try_read(&mut buf)? {
            Some(n) if n > 0 => n,
            _ => {
                ctx.device.record_timeout();
                if !monitor.is_alive() {
                    let elapsed = monitor.time_since_last_data();
                    error!(
                        "Device {}: no CAN data for {:?}",
                        ctx.device.id(),
                        elapsed
                    );
                    return Err(DriverError::ConnectionTimeout { elapsed });
                }
                continue;
            },
        };

        monitor.register_data();
        if let Some(grid) = decoder.push_bytes(&buf[..n])? {
            ctx.publish(grid);
        }
    }

    debug!("Device {}: CAN loop stopped", ctx.device.id());
    Ok(())
}

/// 串口轮询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    /// 下一个周期发送请求
    Idle,
    /// 已发送请求，等待应答
    RequestSent { since: Instant },
}

/// HDLC 串口轮询循环
///
/// ```text
/// Idle ──(清空输入，发送 GET_DATA)──> RequestSent
/// RequestSent ──DATA(72 字节)──> 更新数组，保持 RequestSent
/// RequestSent ──ACK──> 回复 ACK，回到 Idle，清零超时计数
/// RequestSent ──response_timeout 内无帧──> 超时计数 +1，回到 Idle 重新请求
/// ```
///
/// 连续 `max_timeouts` 次超时返回 [`DriverError::ResponseTimeout`]。
pub fn serial_loop<T: ByteTransport + ?Sized>(
    transport: &mut T,
    ctx: &LoopContext,
    config: &SerialConfig,
) -> Result<(), DriverError> {
    transport.set_read_timeout(config.read_timeout())?;

    let shape = ctx.device.shape();
    let request = hdlc::data_request_frame();
    let ack = hdlc::ack_reply_frame();
    let mut extractor = FrameExtractor::default();
    let mut state = PollState::Idle;
    let mut timeouts = 0u32;
    let mut next_request = Instant::now();
    let mut buf = [0u8; 256];

    debug!("Device {}: serial loop started", ctx.device.id());

    while ctx.is_running() {
        let since = match state {
            PollState::Idle => {
                sleep_until(next_request);
                next_request = Instant::now() + config.update_period();

                transport.clear_input()?;
                extractor.clear();
                transport.write_all(&request)?;
                trace!("Device {}: GET_DATA sent", ctx.device.id());

                let now = Instant::now();
                state = PollState::RequestSent { since: now };
                now
            },
            PollState::RequestSent { since } => since,
        };

        if let Some(n) = transport.try_read(&mut buf)?
            && n > 0
        {
            extractor.push(&buf[..n]);
        }

        let Some(frames) = extractor.extract() else {
            if since.elapsed() >= config.response_timeout() {
                timeouts += 1;
                ctx.device.record_timeout();
                warn!(
                    "Device {}: no response ({}/{})",
                    ctx.device.id(),
                    timeouts,
                    config.max_timeouts
                );
                if timeouts >= config.max_timeouts {
                    error!("Device {}: too many timeouts", ctx.device.id());
                    return Err(DriverError::ResponseTimeout { attempts: timeouts });
                }
                state = PollState::Idle;
            }
            continue;
        };

        // 收到帧即刷新等待起点
        state = PollState::RequestSent {
            since: Instant::now(),
        };

        for raw in frames {
            let frame = match hdlc::decode_frame(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Device {}: dropping HDLC frame: {}", ctx.device.id(), e);
                    ctx.device.record_dropped_frame();
                    continue;
                },
            };

            match frame.kind {
                FrameKind::Ack { .. } => {
                    transport.write_all(&ack)?;
                    state = PollState::Idle;
                    timeouts = 0;
                    break;
                },
                FrameKind::Data { .. } if frame.payload.len() == shape.payload_len() => {
                    if let Some(array) = to_taxel_array(shape, &frame.payload) {
                        ctx.publish(array);
                    }
                },
                FrameKind::Data { .. } => {
                    warn!(
                        "Device {}: received payload with wrong size ({} bytes), ignoring",
                        ctx.device.id(),
                        frame.payload.len()
                    );
                    ctx.device.record_dropped_frame();
                },
                FrameKind::Nack { seq } => {
                    debug!("Device {}: NACK (seq {})", ctx.device.id(), seq);
                },
            }
        }
    }

    debug!("Device {}: serial loop stopped", ctx.device.id());
    Ok(())
}

/// 读取一个完整的 WSG 响应帧，返回负载
///
/// `pending` 跨调用保存尚未消费的字节，一帧之后多读到的部分留在其中。
/// 超时或帧头不匹配返回 `Ok(None)`；传输错误返回 `Err`。
fn read_wsg_response<T: ByteTransport + ?Sized>(
    transport: &mut T,
    codec: &WsgCodec,
    timeout: Duration,
    pending: &mut Vec<u8>,
) -> Result<Option<Vec<u8>>, DriverError> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 256];

    loop {
        if pending.len() >= RESPONSE_MIN_LEN {
            let Some(len) = codec.expected_frame_len(pending) else {
                warn!("Unexpected WSG frame header {:02X?}", &pending[..6]);
                pending.clear();
                transport.clear_input()?;
                return Ok(None);
            };
            if pending.len() >= len {
                let frame: Vec<u8> = pending.drain(..len).collect();
                return Ok(codec.decode_frame(&frame).map(<[u8]>::to_vec));
            }
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }

        if let Some(n) = transport.try_read(&mut buf)? {
            pending.extend_from_slice(&buf[..n]);
        }
    }
}

/// 发送一侧的读取请求并等待应答
///
/// 应答不带左右标识，上一周期迟到的应答在发送前丢弃。
fn wsg_exchange<T: ByteTransport + ?Sized>(
    transport: &mut T,
    codec: &WsgCodec,
    request: &[u8],
    timeout: Duration,
    pending: &mut Vec<u8>,
) -> Result<Option<Vec<u8>>, DriverError> {
    if !pending.is_empty() {
        debug!("Discarding {} stale WSG bytes", pending.len());
        pending.clear();
    }
    transport.clear_input()?;
    transport.write_all(request)?;
    read_wsg_response(transport, codec, timeout, pending)
}

/// WSG 夹爪轮询循环
///
/// 每个周期先请求左侧（`0x01`），再请求右侧（`0x02`），两侧都成功后
/// 一次性更新并触发 `NewGripperData`。
/// 连续 `max_timeouts` 个周期失败返回 [`DriverError::ResponseTimeout`]。
pub fn wsg_loop<T: ByteTransport + ?Sized>(
    transport: &mut T,
    ctx: &LoopContext,
    config: &WsgConfig,
) -> Result<(), DriverError> {
    transport.set_read_timeout(config.read_timeout())?;

    let shape = ctx.device.shape();
    let codec = WsgCodec::with_protocol_id(config.protocol_id_bytes());
    let left_request = codec.read_request(SensorSide::Left);
    let right_request = codec.read_request(SensorSide::Right);
    let mut pending = Vec::with_capacity(256);
    let mut failures = 0u32;

    debug!("Device {}: WSG loop started", ctx.device.id());

    while ctx.is_running() {
        let next_tick = Instant::now() + config.update_period();

        let timeout = config.read_timeout();
        let left = wsg_exchange(transport, &codec, &left_request, timeout, &mut pending)?;
        let right = wsg_exchange(transport, &codec, &right_request, timeout, &mut pending)?;

        match (left, right) {
            (Some(left), Some(right)) => {
                failures = 0;
                match (to_taxel_array(shape, &left), to_taxel_array(shape, &right)) {
                    (Some(left), Some(right)) => ctx.publish_gripper(left, right),
                    _ => {
                        warn!(
                            "Device {}: received payload with wrong size ({}/{} bytes), ignoring",
                            ctx.device.id(),
                            left.len(),
                            right.len()
                        );
                        ctx.device.record_dropped_frame();
                    },
                }
            },
            _ => {
                failures += 1;
                ctx.device.record_timeout();
                warn!(
                    "Device {}: no response from gripper ({}/{})",
                    ctx.device.id(),
                    failures,
                    config.max_timeouts
                );
                if failures >= config.max_timeouts {
                    error!("Device {}: too many timeouts", ctx.device.id());
                    return Err(DriverError::ResponseTimeout { attempts: failures });
                }
            },
        }

        sleep_until(next_tick);
    }

    debug!("Device {}: WSG loop stopped", ctx.device.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, DeviceKind};
    use touchdetect_protocol::can::encode_package;
    use touchdetect_protocol::hdlc::{DEVICE_ADDRESS, encode_frame};
    use touchdetect_protocol::{ProtocolError, Shape};
    use touchdetect_transport::{MockTransport, TransportError};

    const SHAPE: Shape = Shape::new(6, 6);

    fn grid(seed: u16) -> TaxelArray {
        TaxelArray::from_vec(SHAPE, (0..36).map(|i| seed + i * 7).collect()).unwrap()
    }

    fn context(kind: DeviceKind) -> LoopContext {
        let device = Arc::new(DeviceState::new("dev", kind, SHAPE));
        LoopContext::new(device, Arc::new(EventDispatcher::new()))
    }

    /// 收到 `count` 个数据事件后停止循环
    fn stop_after(ctx: &LoopContext, count: usize) {
        let is_running = ctx.is_running.clone();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        ctx.events.subscribe(move |_: &DeviceId, event: &DeviceEvent| {
            if matches!(event, DeviceEvent::NewData(_) | DeviceEvent::NewGripperData { .. })
                && seen.fetch_add(1, Ordering::SeqCst) + 1 >= count
            {
                is_running.store(false, Ordering::Release);
            }
        });
    }

    fn fast_serial_config() -> SerialConfig {
        SerialConfig {
            read_timeout_ms: 2,
            update_period_ms: 1,
            response_timeout_ms: 20,
            ..SerialConfig::default()
        }
    }

    #[test]
    fn test_can_loop_publishes_package() {
        let ctx = context(DeviceKind::can("mock"));
        stop_after(&ctx, 1);

        let mock = MockTransport::new();
        let frames = encode_package(&grid(100)).unwrap();
        // 半帧前缀：需要先对齐
        mock.inject(&[0x12, 0x34, 0xFE]);
        mock.inject(&frames.concat());

        let mut transport = mock.clone();
        can_loop(&mut transport, &ctx, &CanConfig::default()).unwrap();

        assert_eq!(*ctx.device.taxels(), grid(100));
        assert_eq!(ctx.device.take_latest().unwrap().sequence, 1);
    }

    #[test]
    fn test_can_loop_sync_failure() {
        let ctx = context(DeviceKind::can("mock"));
        let mock = MockTransport::new();
        mock.inject(&[0x00; 400]);

        let mut transport = mock.clone();
        let err = can_loop(&mut transport, &ctx, &CanConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Protocol(ProtocolError::SyncFailed { .. })
        ));
    }

    #[test]
    fn test_can_loop_silence_timeout() {
        let ctx = context(DeviceKind::can("mock"));
        let config = CanConfig {
            read_timeout_ms: 1,
            silence_timeout_ms: 30,
            ..CanConfig::default()
        };
        let mut transport = MockTransport::new();
        let err = can_loop(&mut transport, &ctx, &config).unwrap_err();
        assert!(matches!(err, DriverError::ConnectionTimeout { .. }));
        assert!(ctx.device.stats().timeouts > 0);
    }

    #[test]
    fn test_can_loop_transport_closed() {
        let ctx = context(DeviceKind::can("mock"));
        let mock = MockTransport::new();
        mock.close_remote();
        let mut transport = mock.clone();
        let err = can_loop(&mut transport, &ctx, &CanConfig::default()).unwrap_err();
        assert!(matches!(err, DriverError::Transport(TransportError::Closed)));
    }

    #[test]
    fn test_can_loop_stops_when_not_running() {
        let ctx = context(DeviceKind::can("mock"));
        ctx.is_running.store(false, Ordering::Release);
        let mut transport = MockTransport::new();
        can_loop(&mut transport, &ctx, &CanConfig::default()).unwrap();
    }

    #[test]
    fn test_serial_loop_request_and_data() {
        let ctx = context(DeviceKind::serial("mock"));
        stop_after(&ctx, 2);

        let mock = MockTransport::new();
        let payload = grid(5).to_payload();
        mock.set_responder(move |request| {
            if request == hdlc::data_request_frame().as_slice() {
                let mut reply = encode_frame(DEVICE_ADDRESS, FrameKind::Data { seq: 0 }, &payload);
                reply.extend(encode_frame(DEVICE_ADDRESS, FrameKind::Ack { seq: 1 }, &[]));
                reply
            } else {
                Vec::new()
            }
        });

        let mut transport = mock.clone();
        serial_loop(&mut transport, &ctx, &fast_serial_config()).unwrap();

        assert_eq!(*ctx.device.taxels(), grid(5));
        let written = mock.take_written();
        assert!(written.starts_with(&hdlc::data_request_frame()));
        // 每个 ACK 都得到回复
        let ack = hdlc::ack_reply_frame();
        assert!(written.windows(ack.len()).any(|w| w == ack.as_slice()));
    }

    #[test]
    fn test_serial_loop_wrong_size_ignored() {
        let ctx = context(DeviceKind::serial("mock"));
        stop_after(&ctx, 1);

        let mock = MockTransport::new();
        let good = grid(9).to_payload();
        let mut replies = 0;
        mock.set_responder(move |request| {
            if request != hdlc::data_request_frame().as_slice() {
                return Vec::new();
            }
            replies += 1;
            let payload: &[u8] = if replies == 1 { &[1, 2, 3] } else { &good };
            let mut reply = encode_frame(DEVICE_ADDRESS, FrameKind::Data { seq: 0 }, payload);
            reply.extend(encode_frame(DEVICE_ADDRESS, FrameKind::Ack { seq: 1 }, &[]));
            reply
        });

        let mut transport = mock.clone();
        serial_loop(&mut transport, &ctx, &fast_serial_config()).unwrap();

        assert_eq!(*ctx.device.taxels(), grid(9));
        assert_eq!(ctx.device.stats().dropped_frames, 1);
        assert_eq!(ctx.device.stats().samples, 1);
    }

    #[test]
    fn test_serial_loop_response_timeout() {
        let ctx = context(DeviceKind::serial("mock"));
        let mock = MockTransport::new();
        let mut transport = mock.clone();

        let err = serial_loop(&mut transport, &ctx, &fast_serial_config()).unwrap_err();
        assert!(matches!(err, DriverError::ResponseTimeout { attempts: 3 }));
        assert_eq!(ctx.device.stats().timeouts, 3);
        // 每次超时后重新请求
        assert_eq!(mock.write_count(), 3);
    }

    #[test]
    fn test_serial_loop_write_failure() {
        let ctx = context(DeviceKind::serial("mock"));
        let mock = MockTransport::new();
        mock.fail_writes(true);
        let mut transport = mock.clone();
        let err = serial_loop(&mut transport, &ctx, &fast_serial_config()).unwrap_err();
        assert!(matches!(err, DriverError::Transport(TransportError::Io(_))));
    }

    fn wsg_responder(codec: WsgCodec, left: Vec<u8>, right: Vec<u8>) -> impl FnMut(&[u8]) -> Vec<u8> + Send {
        move |request| {
            let payload = match codec.decode_frame(request) {
                Some([1]) => &left,
                Some([2]) => &right,
                _ => return Vec::new(),
            };
            codec.make_frame(payload).unwrap()
        }
    }

    #[test]
    fn test_wsg_loop_updates_both_sides() {
        let ctx = context(DeviceKind::tcp("mock"));
        stop_after(&ctx, 1);

        let mock = MockTransport::new();
        mock.set_responder(wsg_responder(
            WsgCodec::new(),
            grid(1).to_payload(),
            grid(2).to_payload(),
        ));

        let config = WsgConfig {
            read_timeout_ms: 20,
            ..WsgConfig::default()
        };
        let mut transport = mock.clone();
        wsg_loop(&mut transport, &ctx, &config).unwrap();

        assert_eq!(*ctx.device.taxels(), grid(1));
        assert_eq!(*ctx.device.taxels_right().unwrap(), grid(2));

        let codec = WsgCodec::new();
        let mut expected = codec.read_request(SensorSide::Left);
        expected.extend(codec.read_request(SensorSide::Right));
        assert_eq!(mock.take_written(), expected);
    }

    #[test]
    fn test_wsg_loop_discards_stale_response() {
        let ctx = context(DeviceKind::tcp("mock"));
        stop_after(&ctx, 1);

        let codec = WsgCodec::new();
        let mock = MockTransport::new();
        // 上一周期超时后才到达的应答
        let stale = TaxelArray::from_vec(SHAPE, vec![222; 36]).unwrap();
        mock.inject(&codec.make_frame(&stale.to_payload()).unwrap());
        mock.set_responder(wsg_responder(
            WsgCodec::new(),
            grid(1).to_payload(),
            grid(2).to_payload(),
        ));

        let config = WsgConfig {
            read_timeout_ms: 20,
            ..WsgConfig::default()
        };
        let mut transport = mock.clone();
        wsg_loop(&mut transport, &ctx, &config).unwrap();

        assert_eq!(*ctx.device.taxels(), grid(1));
        assert_eq!(*ctx.device.taxels_right().unwrap(), grid(2));
    }

    #[test]
    fn test_read_wsg_response_keeps_trailing_bytes() {
        let codec = WsgCodec::new();
        let mock = MockTransport::new();
        let mut both = codec.make_frame(&grid(3).to_payload()).unwrap();
        both.extend(codec.make_frame(&grid(4).to_payload()).unwrap());
        mock.inject(&both);

        let mut transport = mock.clone();
        let mut pending = Vec::new();
        let timeout = Duration::from_millis(20);
        let first = read_wsg_response(&mut transport, &codec, timeout, &mut pending).unwrap();
        assert_eq!(first, Some(grid(3).to_payload()));
        assert!(!pending.is_empty());

        let second = read_wsg_response(&mut transport, &codec, timeout, &mut pending).unwrap();
        assert_eq!(second, Some(grid(4).to_payload()));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_wsg_loop_protocol_id_mismatch_times_out() {
        let ctx = context(DeviceKind::tcp("mock"));
        let mock = MockTransport::new();
        // 设备使用另一个协议 ID，请求无法被解码，也不会有响应
        mock.set_responder(wsg_responder(
            WsgCodec::with_protocol_id([0xAA, 0xAA]),
            grid(1).to_payload(),
            grid(2).to_payload(),
        ));

        let config = WsgConfig {
            read_timeout_ms: 5,
            update_period_ms: 1,
            ..WsgConfig::default()
        };
        let mut transport = mock.clone();
        let err = wsg_loop(&mut transport, &ctx, &config).unwrap_err();
        assert!(matches!(err, DriverError::ResponseTimeout { attempts: 3 }));
        assert_eq!(ctx.device.stats().samples, 0);
    }

    #[test]
    fn test_wsg_loop_wrong_payload_size() {
        let ctx = context(DeviceKind::tcp("mock"));
        let mock = MockTransport::new();
        mock.set_responder(wsg_responder(WsgCodec::new(), vec![1, 2, 3], vec![4, 5, 6]));

        let is_running = ctx.is_running.clone();
        let device = ctx.device.clone();
        let stopper = std::thread::spawn(move || {
            while device.stats().dropped_frames < 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
            is_running.store(false, Ordering::Release);
        });

        let config = WsgConfig {
            read_timeout_ms: 20,
            update_period_ms: 1,
            ..WsgConfig::default()
        };
        let mut transport = mock.clone();
        wsg_loop(&mut transport, &ctx, &config).unwrap();
        stopper.join().unwrap();

        assert_eq!(ctx.device.stats().samples, 0);
        assert_eq!(*ctx.device.taxels(), TaxelArray::zeros(SHAPE));
    }
}
