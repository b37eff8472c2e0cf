//! USB-CAN 适配器帧解析
//!
//! 适配器把每条 CAN 报文包装成固定 22 字节的记录：
//!
//! ```text
//! [0]      0xFF 起始
//! [1..5]   帧 ID（按 make_byte 两两合并）
//! [5..15]  数据（5 组 make_byte -> b0..b4）
//! [21]     0xFE 结束
//! ```
//!
//! 适配器会对每个字节做"位填充"：最高位和低 7 位分散在相邻两个线上字节中，
//! 由 [`make_byte`] 还原。
//!
//! 一个完整数据包由 12 帧组成，ID 依次为 `0x300..=0x30B`，
//! 每帧携带 3 个 12 位采样值，共 36 个值组成 6×6 网格。

use bytes::{Buf, BytesMut};
use tracing::{debug, error, trace, warn};

use crate::ProtocolError;
use crate::taxel::{DEFAULT_SHAPE, TaxelArray};

/// 帧起始字节
pub const START_OF_FRAME: u8 = 0xFF;
/// 帧结束字节
pub const END_OF_FRAME: u8 = 0xFE;
/// 每帧字节数
pub const FRAME_SIZE: usize = 22;
/// 每个数据包的帧数
pub const PACKAGE_SIZE: usize = 12;
/// 数据包第 0 帧的 CAN ID
pub const DEVICE_ID: u16 = 0x300;
/// 默认最大同步尝试次数（一个完整数据包的字节数）
pub const DEFAULT_MAX_SYNC_ATTEMPTS: usize = FRAME_SIZE * PACKAGE_SIZE;
/// 默认连续无效帧上限，超过后重新同步
pub const DEFAULT_MAX_INVALID_FRAMES: usize = PACKAGE_SIZE;

/// 一帧适配器数据
pub type CanFrame = [u8; FRAME_SIZE];

/// 合并两个线上字节：取 `high` 的最高位和 `low` 的低 7 位
///
/// # Example
///
/// ```
/// use touchdetect_protocol::can::make_byte;
///
/// assert_eq!(make_byte(0x80, 0x6D), 0xED);
/// assert_eq!(make_byte(0x00, 0x45), 0x45);
/// ```
#[inline]
pub const fn make_byte(high: u8, low: u8) -> u8 {
    (high & 0x80) | (low & 0x7F)
}

/// `high << 8 | low`
#[inline]
pub const fn make_short(high: u8, low: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}

/// 检查帧结构：长度 22，首字节 0xFF，末字节 0xFE
pub fn check_frame_format(frame: &[u8]) -> bool {
    frame.len() == FRAME_SIZE
        && frame[0] == START_OF_FRAME
        && frame[FRAME_SIZE - 1] == END_OF_FRAME
}

/// 帧 ID（12 位）
pub fn get_frame_id(frame: &CanFrame) -> u16 {
    let high = make_byte(frame[1], frame[2]) & 0x0F;
    let low = make_byte(frame[3], frame[4]);
    make_short(high, low)
}

/// 是否为数据包的第 0 帧
pub fn is_starting_frame(frame: &CanFrame) -> bool {
    get_frame_id(frame) == DEVICE_ID
}

/// 解码完整数据包（不检查帧 ID 顺序）
///
/// 每帧：
/// - `b[k] = make_byte(frame[5 + 2k], frame[6 + 2k])`，`k = 0..5`
/// - 值依次为 `make_short(b3 & 0x0F, b0)`、`make_short(b3 >> 4, b1)`、`make_short(b4 & 0x0F, b2)`
pub fn decode_package(package: &[CanFrame]) -> Result<TaxelArray, ProtocolError> {
    if package.len() != PACKAGE_SIZE {
        return Err(ProtocolError::InvalidLength {
            expected: PACKAGE_SIZE,
            actual: package.len(),
        });
    }

    let mut values = Vec::with_capacity(PACKAGE_SIZE * 3);
    for frame in package {
        let mut b = [0u8; 5];
        for (k, byte) in b.iter_mut().enumerate() {
            let i = 5 + 2 * k;
            *byte = make_byte(frame[i], frame[i + 1]);
        }
        values.push(make_short(b[3] & 0x0F, b[0]));
        values.push(make_short(b[3] >> 4, b[1]));
        values.push(make_short(b[4] & 0x0F, b[2]));
    }

    let actual = values.len();
    TaxelArray::from_vec(DEFAULT_SHAPE, values).ok_or(ProtocolError::InvalidLength {
        expected: DEFAULT_SHAPE.len(),
        actual,
    })
}

/// 拆分一个线上字节（[`make_byte`] 的逆操作）
const fn split_byte(byte: u8) -> [u8; 2] {
    [byte & 0x80, byte & 0x7F]
}

/// 把 6×6 网格编码为一个完整数据包（[`decode_package`] 的逆操作）
///
/// 采样值只保留低 12 位。用于设备模拟和测试。
pub fn encode_package(grid: &TaxelArray) -> Result<Vec<CanFrame>, ProtocolError> {
    if grid.shape() != DEFAULT_SHAPE {
        return Err(ProtocolError::ShapeMismatch {
            expected: DEFAULT_SHAPE,
            actual: grid.shape(),
        });
    }

    let frames = grid
        .as_slice()
        .chunks_exact(3)
        .enumerate()
        .map(|(i, values)| {
            let id = DEVICE_ID + i as u16;
            let (v0, v1, v2) = (values[0] & 0x0FFF, values[1] & 0x0FFF, values[2] & 0x0FFF);
            let b = [
                v0 as u8,
                v1 as u8,
                v2 as u8,
                ((v0 >> 8) as u8) | (((v1 >> 8) as u8) << 4),
                (v2 >> 8) as u8,
            ];

            let mut frame = [0u8; FRAME_SIZE];
            frame[0] = START_OF_FRAME;
            frame[1..3].copy_from_slice(&split_byte((id >> 8) as u8 & 0x0F));
            frame[3..5].copy_from_slice(&split_byte(id as u8));
            for (k, byte) in b.iter().enumerate() {
                let i = 5 + 2 * k;
                frame[i..i + 2].copy_from_slice(&split_byte(*byte));
            }
            frame[FRAME_SIZE - 1] = END_OF_FRAME;
            frame
        })
        .collect();
    Ok(frames)
}

/// 解码器同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// 寻找帧边界
    Searching,
    /// 已对齐，按 22 字节逐帧读取
    Synced,
    /// 同步失败，需要 `reset()`
    Failed,
}

/// CAN 数据包流式解码器
///
/// 逐块喂入串口读到的字节（任意长度、任意切分），
/// 每凑齐一个完整数据包就解码为 6×6 网格。
///
/// - `Searching`：逐字节滑动，直到窗口满足 `[0] == 0xFF && [21] == 0xFE`；
///   超过 `max_sync_attempts` 次仍未对齐则返回 [`ProtocolError::SyncFailed`]
/// - `Synced`：无效帧丢弃但不清空当前包；起始帧清空未完成的包；
///   第一个起始帧之前的帧被忽略；ID 不连续时丢弃当前包；
///   连续 `max_invalid_frames` 个无效帧后回到 `Searching`
///
/// 一次 `push_bytes` 如果完成了多个包，只返回最新的一个。
#[derive(Debug)]
pub struct CanPackageDecoder {
    buffer: BytesMut,
    state: SyncState,
    package: Vec<CanFrame>,
    sync_attempts: usize,
    invalid_frames: usize,
    max_sync_attempts: usize,
    max_invalid_frames: usize,
}

impl Default for CanPackageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CanPackageDecoder {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SYNC_ATTEMPTS, DEFAULT_MAX_INVALID_FRAMES)
    }

    pub fn with_limits(max_sync_attempts: usize, max_invalid_frames: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_SIZE * PACKAGE_SIZE * 2),
            state: SyncState::Searching,
            package: Vec::with_capacity(PACKAGE_SIZE),
            sync_attempts: 0,
            invalid_frames: 0,
            max_sync_attempts,
            max_invalid_frames: max_invalid_frames.max(1),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// 当前包中已收集的帧数
    pub fn pending_frames(&self) -> usize {
        self.package.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 清空所有状态，回到 `Searching`
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.package.clear();
        self.state = SyncState::Searching;
        self.sync_attempts = 0;
        self.invalid_frames = 0;
    }

    /// 喂入新数据
    ///
    /// 返回本次完成的最新数据包；同步失败时返回错误，此后每次调用都返回
    /// 同样的错误，直到 `reset()`。
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<Option<TaxelArray>, ProtocolError> {
        if self.state == SyncState::Failed {
            return Err(ProtocolError::SyncFailed {
                attempts: self.sync_attempts,
            });
        }

        self.buffer.extend_from_slice(data);
        let mut latest = None;

        while self.buffer.len() >= FRAME_SIZE {
            match self.state {
                SyncState::Searching => {
                    if self.buffer[0] == START_OF_FRAME
                        && self.buffer[FRAME_SIZE - 1] == END_OF_FRAME
                    {
                        debug!("CAN stream synchronized after {} attempts", self.sync_attempts);
                        self.state = SyncState::Synced;
                        self.sync_attempts = 0;
                        self.invalid_frames = 0;
                        continue;
                    }

                    self.buffer.advance(1);
                    self.sync_attempts += 1;
                    if self.sync_attempts > self.max_sync_attempts {
                        error!(
                            "CAN synchronization failed after {} attempts",
                            self.sync_attempts
                        );
                        self.state = SyncState::Failed;
                        self.buffer.clear();
                        self.package.clear();
                        return Err(ProtocolError::SyncFailed {
                            attempts: self.sync_attempts,
                        });
                    }
                },
                SyncState::Synced => {
                    let mut frame = [0u8; FRAME_SIZE];
                    frame.copy_from_slice(&self.buffer[..FRAME_SIZE]);
                    self.buffer.advance(FRAME_SIZE);

                    if let Some(grid) = self.accept_frame(frame) {
                        latest = Some(grid);
                    }
                },
                SyncState::Failed => break,
            }
        }

        Ok(latest)
    }

    fn accept_frame(&mut self, frame: CanFrame) -> Option<TaxelArray> {
        if !check_frame_format(&frame) {
            self.invalid_frames += 1;
            warn!(
                "Invalid CAN frame ({} consecutive), dropping",
                self.invalid_frames
            );
            if self.invalid_frames >= self.max_invalid_frames {
                warn!("Too many invalid CAN frames, resynchronizing");
                self.state = SyncState::Searching;
                self.package.clear();
                self.invalid_frames = 0;
            }
            return None;
        }
        self.invalid_frames = 0;

        let id = get_frame_id(&frame);
        if id == DEVICE_ID {
            if !self.package.is_empty() {
                debug!(
                    "New package started, dropping {} partial frames",
                    self.package.len()
                );
            }
            self.package.clear();
        } else if self.package.is_empty() {
            trace!("Ignoring CAN frame 0x{:03X} before package start", id);
            return None;
        } else {
            let expected = DEVICE_ID + self.package.len() as u16;
            if id != expected {
                warn!(
                    "Out of sequence CAN frame: expected 0x{:03X}, got 0x{:03X}",
                    expected, id
                );
                self.package.clear();
                return None;
            }
        }

        self.package.push(frame);
        if self.package.len() < PACKAGE_SIZE {
            return None;
        }

        let result = decode_package(&self.package);
        self.package.clear();
        match result {
            Ok(grid) => Some(grid),
            Err(e) => {
                warn!("Failed to decode CAN package: {}", e);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_VALID_FRAME_1: CanFrame = [
        0xFF, 0x00, 0x53, 0x00, 0x02, 0x80, 0x41, 0x80, 0x6D, 0x80, 0x6C, 0x00, 0x45, 0x00, 0x04,
        0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
    ];

    const TEST_VALID_FRAME_2: CanFrame = [
        0xFF, 0x00, 0x53, 0x00, 0x06, 0x80, 0x2B, 0x80, 0x72, 0x80, 0x6B, 0x00, 0x45, 0x00, 0x04,
        0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
    ];

    const TEST_MISSING_START_FRAME: [u8; 21] = [
        0x00, 0x53, 0x00, 0x02, 0x80, 0x38, 0x80, 0x6F, 0x80, 0x7B, 0x00, 0x45, 0x00, 0x04, 0x80,
        0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
    ];

    const TEST_MISSING_END_FRAME: [u8; 21] = [
        0xFF, 0x00, 0x53, 0x00, 0x02, 0x80, 0x38, 0x80, 0x6F, 0x80, 0x7B, 0x00, 0x45, 0x00, 0x04,
        0x80, 0x6F, 0x80, 0x23, 0x80, 0x47,
    ];

    const TEST_EMBEDDED_FRAME_IN_MESSAGE: [u8; 35] = [
        0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE, 0xFF, 0x00, 0x53, 0x00, 0x02, 0x80, 0x22, 0x80, 0x6F,
        0x80, 0x5F, 0x00, 0x45, 0x00, 0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE, 0xFF, 0x00,
        0x53, 0x00, 0x03, 0x80, 0x26,
    ];

    const TEST_VALID_PACKAGE: [CanFrame; PACKAGE_SIZE] = [
        [
            0xFF, 0x00, 0x53, 0x00, 0x00, 0x80, 0x16, 0x00, 0x01, 0x80, 0x62, 0x00, 0x55, 0x00,
            0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x01, 0x80, 0x17, 0x80, 0x2C, 0x80, 0x30, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x02, 0x80, 0x32, 0x80, 0x5C, 0x80, 0x73, 0x00, 0x45, 0x00,
            0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x03, 0x80, 0x1B, 0x80, 0x3B, 0x80, 0x39, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x04, 0x80, 0x2F, 0x80, 0x72, 0x80, 0x69, 0x00, 0x45, 0x00,
            0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x05, 0x80, 0x24, 0x80, 0x3C, 0x80, 0x3E, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x06, 0x80, 0x2D, 0x80, 0x5E, 0x80, 0x79, 0x00, 0x45, 0x00,
            0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x07, 0x80, 0x25, 0x80, 0x2D, 0x80, 0x4C, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x08, 0x80, 0x25, 0x00, 0x0C, 0x80, 0x78, 0x00, 0x55, 0x00,
            0x04, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x09, 0x80, 0x2D, 0x80, 0x31, 0x80, 0x3D, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x0A, 0x80, 0x2C, 0x80, 0x78, 0x00, 0x02, 0x00, 0x45, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
        [
            0xFF, 0x00, 0x53, 0x00, 0x0B, 0x80, 0x31, 0x80, 0x4F, 0x80, 0x41, 0x00, 0x55, 0x00,
            0x05, 0x80, 0x6F, 0x80, 0x23, 0x80, 0x47, 0xFE,
        ],
    ];

    const TEST_DECODED_PACKAGE: [[u16; 6]; 6] = [
        [0x596, 0x501, 0x4E2, 0x597, 0x5AC, 0x5B0],
        [0x5B2, 0x4DC, 0x4F3, 0x59B, 0x5BB, 0x5B9],
        [0x5AF, 0x4F2, 0x4E9, 0x5A4, 0x5BC, 0x5BE],
        [0x5AD, 0x4DE, 0x4F9, 0x5A5, 0x5AD, 0x5CC],
        [0x5A5, 0x50C, 0x4F8, 0x5AD, 0x5B1, 0x5BD],
        [0x5AC, 0x4F8, 0x502, 0x5B1, 0x5CF, 0x5C1],
    ];

    fn package_bytes() -> Vec<u8> {
        TEST_VALID_PACKAGE.concat()
    }

    fn expected_grid() -> TaxelArray {
        TaxelArray::from_rows(&TEST_DECODED_PACKAGE).unwrap()
    }

    #[test]
    fn test_make_byte() {
        assert_eq!(make_byte(0x80, 0x6D), 0xED);
        assert_eq!(make_byte(0x00, 0x45), 0x45);
        assert_eq!(make_byte(TEST_VALID_FRAME_2[7], TEST_VALID_FRAME_2[8]), 0xF2);
        assert_eq!(make_byte(TEST_VALID_FRAME_2[11], TEST_VALID_FRAME_2[12]), 0x45);
    }

    #[test]
    fn test_make_short() {
        assert_eq!(make_short(0x80, 0x6D), 0x806D);
        assert_eq!(make_short(0x00, 0x45), 0x0045);
    }

    #[test]
    fn test_check_frame_format() {
        assert!(check_frame_format(&TEST_VALID_FRAME_1));
        assert!(check_frame_format(&TEST_VALID_FRAME_2));
        assert!(!check_frame_format(&TEST_MISSING_START_FRAME));
        assert!(!check_frame_format(&TEST_MISSING_END_FRAME));
        assert!(!check_frame_format(&TEST_EMBEDDED_FRAME_IN_MESSAGE));
        assert!(!check_frame_format(&[]));

        let mut wrong_start = TEST_VALID_FRAME_1;
        wrong_start[0] = 0xFE;
        assert!(!check_frame_format(&wrong_start));
        let mut wrong_end = TEST_VALID_FRAME_1;
        wrong_end[21] = 0xFF;
        assert!(!check_frame_format(&wrong_end));
    }

    #[test]
    fn test_get_frame_id() {
        assert_eq!(get_frame_id(&TEST_VALID_FRAME_1), 0x302);
        assert_eq!(get_frame_id(&TEST_VALID_FRAME_2), 0x306);
        for (index, frame) in TEST_VALID_PACKAGE.iter().enumerate() {
            assert_eq!(get_frame_id(frame), DEVICE_ID + index as u16);
        }
    }

    #[test]
    fn test_is_starting_frame() {
        assert!(is_starting_frame(&TEST_VALID_PACKAGE[0]));
        assert!(!is_starting_frame(&TEST_VALID_FRAME_1));
        assert!(!is_starting_frame(&TEST_VALID_PACKAGE[11]));
    }

    #[test]
    fn test_decode_package() {
        let grid = decode_package(&TEST_VALID_PACKAGE).unwrap();
        assert_eq!(grid, expected_grid());
        assert_eq!(grid.shape(), DEFAULT_SHAPE);
    }

    #[test]
    fn test_decode_package_wrong_count() {
        assert!(matches!(
            decode_package(&TEST_VALID_PACKAGE[..11]),
            Err(ProtocolError::InvalidLength { expected: 12, actual: 11 })
        ));
    }

    #[test]
    fn test_decoder_full_package() {
        let mut decoder = CanPackageDecoder::new();
        let grid = decoder.push_bytes(&package_bytes()).unwrap();
        assert_eq!(grid, Some(expected_grid()));
        assert_eq!(decoder.state(), SyncState::Synced);
        assert_eq!(decoder.pending_frames(), 0);
    }

    #[test]
    fn test_decoder_arbitrary_chunks() {
        let mut decoder = CanPackageDecoder::new();
        let bytes = package_bytes();
        let mut result = None;
        for chunk in bytes.chunks(5) {
            if let Some(grid) = decoder.push_bytes(chunk).unwrap() {
                result = Some(grid);
            }
        }
        assert_eq!(result, Some(expected_grid()));
    }

    #[test]
    fn test_decoder_misaligned_prefix() {
        let mut decoder = CanPackageDecoder::new();
        let mut bytes = vec![0x00, 0x11, 0x22];
        bytes.extend_from_slice(&package_bytes());
        assert_eq!(decoder.push_bytes(&bytes).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_decoder_embedded_frame() {
        let mut decoder = CanPackageDecoder::new();
        assert_eq!(decoder.push_bytes(&TEST_EMBEDDED_FRAME_IN_MESSAGE).unwrap(), None);
        assert_eq!(decoder.state(), SyncState::Synced);
        // 0x302 出现在起始帧之前，被忽略
        assert_eq!(decoder.pending_frames(), 0);
        // 尾部半帧留在缓冲区
        assert_eq!(decoder.buffered_len(), 7);
    }

    #[test]
    fn test_decoder_ignores_frames_before_start() {
        let mut decoder = CanPackageDecoder::new();
        let mut bytes = TEST_VALID_PACKAGE[6..].concat();
        bytes.extend_from_slice(&package_bytes());
        assert_eq!(decoder.push_bytes(&bytes).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_decoder_invalid_frame_does_not_reset_package() {
        let mut decoder = CanPackageDecoder::new();
        let mut bad = TEST_VALID_PACKAGE[5];
        bad[21] = 0x00;

        let mut bytes = TEST_VALID_PACKAGE[..6].concat();
        bytes.extend_from_slice(&bad);
        bytes.extend_from_slice(&TEST_VALID_PACKAGE[6..].concat());
        assert_eq!(decoder.push_bytes(&bytes).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_decoder_out_of_sequence_drops_package() {
        let mut decoder = CanPackageDecoder::new();
        let mut bytes = TEST_VALID_PACKAGE[..6].concat();
        bytes.extend_from_slice(&TEST_VALID_PACKAGE[7]);
        assert_eq!(decoder.push_bytes(&bytes).unwrap(), None);
        assert_eq!(decoder.pending_frames(), 0);

        // 后续帧不是起始帧，也被忽略
        assert_eq!(decoder.push_bytes(&TEST_VALID_PACKAGE[8..].concat()).unwrap(), None);
        assert_eq!(decoder.push_bytes(&package_bytes()).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_decoder_restart_flushes_partial() {
        let mut decoder = CanPackageDecoder::new();
        let mut bytes = TEST_VALID_PACKAGE[..4].concat();
        bytes.extend_from_slice(&package_bytes());
        assert_eq!(decoder.push_bytes(&bytes).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_decoder_returns_latest_package() {
        let mut second = TEST_VALID_PACKAGE;
        // b0 = 0x97 -> 第一个值 0x597
        second[0][6] = 0x17;

        let mut bytes = package_bytes();
        bytes.extend_from_slice(&second.concat());

        let grid = CanPackageDecoder::new().push_bytes(&bytes).unwrap().unwrap();
        assert_eq!(grid.get(0, 0), Some(0x597));
        assert_eq!(grid.get(5, 5), Some(0x5C1));
    }

    #[test]
    fn test_decoder_sync_failure() {
        let mut decoder = CanPackageDecoder::new();
        let noise = vec![0x00; 300];
        let err = decoder.push_bytes(&noise).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SyncFailed {
                attempts: DEFAULT_MAX_SYNC_ATTEMPTS + 1
            }
        );
        assert_eq!(decoder.state(), SyncState::Failed);

        // 失败后保持失败，直到 reset
        assert!(decoder.push_bytes(&package_bytes()).is_err());
        decoder.reset();
        assert_eq!(decoder.state(), SyncState::Searching);
        assert_eq!(decoder.push_bytes(&package_bytes()).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_encode_package_matches_decoder() {
        let frames = encode_package(&expected_grid()).unwrap();
        assert_eq!(frames.len(), PACKAGE_SIZE);
        for (i, frame) in frames.iter().enumerate() {
            assert!(check_frame_format(frame));
            assert_eq!(get_frame_id(frame), DEVICE_ID + i as u16);
        }
        assert!(is_starting_frame(&frames[0]));
        assert_eq!(decode_package(&frames).unwrap(), expected_grid());

        let mut decoder = CanPackageDecoder::new();
        assert_eq!(decoder.push_bytes(&frames.concat()).unwrap(), Some(expected_grid()));
    }

    #[test]
    fn test_encode_package_rejects_shape() {
        let grid = TaxelArray::zeros(crate::Shape::new(4, 4));
        assert!(matches!(
            encode_package(&grid),
            Err(ProtocolError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_decoder_resynchronizes_after_invalid_frames() {
        let mut decoder = CanPackageDecoder::with_limits(DEFAULT_MAX_SYNC_ATTEMPTS, 2);
        assert_eq!(decoder.push_bytes(&TEST_VALID_PACKAGE[0]).unwrap(), None);
        assert_eq!(decoder.state(), SyncState::Synced);
        assert_eq!(decoder.pending_frames(), 1);

        decoder.push_bytes(&[0x00; FRAME_SIZE * 2]).unwrap();
        assert_eq!(decoder.state(), SyncState::Searching);
        assert_eq!(decoder.pending_frames(), 0);
    }
}
