//! 传感器数组（Taxel Array）
//!
//! 所有传输方式最终都归一到同一种内存表示：行优先的 `u16` 二维网格。
//! 默认尺寸 6×6。

use std::fmt;

use tracing::warn;

/// 网格尺寸（行, 列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// 单元格数量
    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 编码后的字节数（每个 taxel 2 字节）
    pub const fn payload_len(&self) -> usize {
        self.len() * 2
    }
}

impl Default for Shape {
    fn default() -> Self {
        DEFAULT_SHAPE
    }
}

impl From<(usize, usize)> for Shape {
    fn from((rows, cols): (usize, usize)) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// 默认网格尺寸
pub const DEFAULT_SHAPE: Shape = Shape::new(6, 6);

/// 传感器数组
///
/// 固定尺寸，行优先存储。每个单元为 16 位无符号采样值
/// （ADC 实际范围 0-4095，容器接受 0-65535）。
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawTaxelArray"))]
pub struct TaxelArray {
    shape: Shape,
    data: Vec<u16>,
}

/// 反序列化的中间形式，经 `TryFrom` 校验长度后才成为 [`TaxelArray`]
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawTaxelArray {
    shape: Shape,
    data: Vec<u16>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawTaxelArray> for TaxelArray {
    type Error = crate::ProtocolError;

    fn try_from(raw: RawTaxelArray) -> Result<Self, Self::Error> {
        let actual = raw.data.len();
        let Some(expected) = raw.shape.rows.checked_mul(raw.shape.cols) else {
            return Err(crate::ProtocolError::InvalidLength {
                expected: usize::MAX,
                actual,
            });
        };
        Self::from_vec(raw.shape, raw.data)
            .ok_or(crate::ProtocolError::InvalidLength { expected, actual })
    }
}

impl TaxelArray {
    /// 全零数组
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0; shape.len()],
        }
    }

    /// 从行优先的扁平数据创建
    ///
    /// 长度与尺寸不一致时返回 `None`。
    pub fn from_vec(shape: Shape, data: Vec<u16>) -> Option<Self> {
        (data.len() == shape.len()).then_some(Self { shape, data })
    }

    /// 从行列表创建（所有行必须等长）
    pub fn from_rows<R: AsRef<[u16]>>(rows: &[R]) -> Option<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        if rows.iter().any(|r| r.as_ref().len() != cols) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.as_ref().iter().copied()).collect();
        Some(Self {
            shape: Shape::new(rows.len(), cols),
            data,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u16> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return None;
        }
        self.data.get(row * self.shape.cols + col).copied()
    }

    /// 第 `row` 行
    pub fn row(&self, row: usize) -> Option<&[u16]> {
        if row >= self.shape.rows {
            return None;
        }
        let start = row * self.shape.cols;
        self.data.get(start..start + self.shape.cols)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u16]> {
        // cols 为 0 时 chunks 会 panic
        self.data.chunks(self.shape.cols.max(1))
    }

    /// 行优先的扁平数据
    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u16> {
        self.data
    }

    /// 转换为嵌套 Vec（便于序列化输出）
    pub fn to_nested(&self) -> Vec<Vec<u16>> {
        self.rows().map(<[u16]>::to_vec).collect()
    }

    /// 编码为小端字节序负载（`to_taxel_array` 的逆过程）
    pub fn to_payload(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

impl Default for TaxelArray {
    fn default() -> Self {
        Self::zeros(DEFAULT_SHAPE)
    }
}

/// 将扁平字节负载转换为传感器数组
///
/// 负载长度必须严格等于 `2 * rows * cols`，
/// 每个单元为 `payload[2i] | payload[2i + 1] << 8`（小端），行优先。
/// 长度不符时返回 `None`，不截断也不越界读取。
///
/// # Example
///
/// ```
/// use touchdetect_protocol::taxel::{Shape, to_taxel_array};
///
/// let grid = to_taxel_array(Shape::new(1, 2), &[0x01, 0x00, 0x02, 0x01]).unwrap();
/// assert_eq!(grid.as_slice(), &[0x0001, 0x0102]);
/// ```
pub fn to_taxel_array(shape: impl Into<Shape>, payload: &[u8]) -> Option<TaxelArray> {
    let shape = shape.into();
    if payload.len() != shape.payload_len() {
        warn!(
            "Taxel payload size mismatch: expected {} bytes for {}, got {}",
            shape.payload_len(),
            shape,
            payload.len()
        );
        return None;
    }

    let data = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some(TaxelArray { shape, data })
}
