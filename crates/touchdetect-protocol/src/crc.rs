//! CRC16 校验
//!
//! WSG 夹爪与串口 TouchDetect 使用同一种 CRC16：
//! - 查找表由多项式 `0x1021` 按 MSB-first 生成（`0x0000, 0x1021, 0x2042, ...`）
//! - 但按 LSB-first 方式索引：`crc = TABLE[(crc ^ byte) & 0xFF] ^ (crc >> 8)`
//! - 初值 `0xFFFF`，无最终异或
//!
//! 这不是标准目录中的任何一种 CRC16 变体，因此查找表在这里直接生成，
//! 不能替换为 `CRC_16_*` 常量。

/// 默认初值
pub const CRC16_SEED: u16 = 0xFFFF;

const POLY: u16 = 0x1021;

/// 256 项查找表（编译期生成）
static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// 计算 `data` 的 CRC16
///
/// `seed` 为上一次的结果时，继续同一个校验和：
/// `checksum(b, checksum(a, CRC16_SEED)) == checksum(a ++ b, CRC16_SEED)`。
///
/// # Example
///
/// ```
/// use touchdetect_protocol::crc::{CRC16_SEED, checksum};
///
/// assert_eq!(checksum(&[0xFF, 0x12, 0x01], CRC16_SEED), 0xB1E6);
/// ```
pub fn checksum(data: &[u8], seed: u16) -> u16 {
    data.iter().fold(seed, |crc, &byte| {
        TABLE[((crc ^ byte as u16) & 0xFF) as usize] ^ (crc >> 8)
    })
}

/// 增量 CRC16 累加器
///
/// 帧头和负载分开计算时使用（WSG 帧先算 header，再算 payload）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    /// 以默认初值 `0xFFFF` 创建
    pub const fn new() -> Self {
        Self { value: CRC16_SEED }
    }

    /// 以指定初值创建（例如上一次的结果）
    pub const fn with_seed(seed: u16) -> Self {
        Self { value: seed }
    }

    /// 追加数据
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.value = checksum(data, self.value);
        self
    }

    /// 当前校验值
    pub const fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}
