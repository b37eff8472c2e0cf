//! 串口传输
//!
//! 8N1，无流控。CAN 适配器和 HDLC 串口设备共用。

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, trace};

use crate::{ByteTransport, TransportError};

/// 串口传输
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    /// 关闭时拉高 DTR/RTS（CAN 适配器）
    raise_lines_on_close: bool,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport").field("name", &self.name).finish()
    }
}

impl SerialTransport {
    /// 打开串口
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        debug!("Opened serial port {} @ {} baud", port_name, baud_rate);
        Ok(Self {
            port,
            name: port_name.to_string(),
            raise_lines_on_close: false,
        })
    }

    /// 打开 USB-CAN 适配器：拉低 DTR/RTS 并清空输入，关闭时再拉高
    pub fn open_can_adapter(
        port_name: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut transport = Self::open(port_name, baud_rate, read_timeout)?;
        transport.set_control_lines(false)?;
        transport.clear_input()?;
        transport.raise_lines_on_close = true;
        Ok(transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 设置 DTR/RTS 电平
    ///
    /// CAN 适配器在读取前需要拉低两条线，关闭前再拉高。
    pub fn set_control_lines(&mut self, level: bool) -> Result<(), TransportError> {
        self.port.write_data_terminal_ready(level)?;
        self.port.write_request_to_send(level)?;
        Ok(())
    }
}

impl ByteTransport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        trace!("{} TX {} bytes", self.name, data.len());
        Write::write_all(&mut self.port, data)?;
        Write::flush(&mut self.port)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = Read::read(&mut self.port, buf)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.raise_lines_on_close {
            self.set_control_lines(true)?;
        }
        debug!("Closed serial port {}", self.name);
        Ok(())
    }
}

/// 列出制造商匹配的 USB 串口
///
/// `manufacturers` 为空时返回所有串口。
pub fn find_ports(manufacturers: &[&str]) -> Result<Vec<String>, TransportError> {
    let ports = serialport::available_ports()?
        .into_iter()
        .filter(|info| {
            if manufacturers.is_empty() {
                return true;
            }
            match &info.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .manufacturer
                    .as_deref()
                    .is_some_and(|m| manufacturers.iter().any(|want| m.contains(want))),
                _ => false,
            }
        })
        .map(|info| info.port_name)
        .collect();
    Ok(ports)
}
