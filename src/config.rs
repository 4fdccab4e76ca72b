/// Number of data bits per character frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
}

/// Number of stop bits per character frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One = 1,
    Two = 2,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None = 0,
    /// RTS/CTS hardware flow control.
    RtsCts = 1,
    /// XON/XOFF software flow control.
    XonXoff = 2,
}

/// Configuration for a serial device.
///
/// The baud rate must be one of the standard speeds the device layer can map
/// to a termios constant (50 through 921600); unsupported values fail at open
/// time with [`Error::SocketBind`](crate::Error::SocketBind).
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Path to the character device (e.g., `/dev/ttyUSB0`).
    pub device_path: String,
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Data bits per frame.
    pub data_bits: DataBits,
    /// Stop bits per frame.
    pub stop_bits: StopBits,
    /// Parity mode.
    pub parity: Parity,
    /// Flow control mode.
    pub flow_control: FlowControl,
    /// Assert RTS and DTR after configuring the line.
    pub rts_dtr_on: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            rts_dtr_on: false,
        }
    }
}

impl SerialConfig {
    /// Validate configuration values. Returns an error if any value is unusable.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.device_path.is_empty() {
            return Err(crate::error::Error::SocketCreate(
                "device path empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_115200_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.device_path, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
        assert!(!config.rts_dtr_on);
    }

    #[test]
    fn empty_device_path_rejected() {
        let config = SerialConfig {
            device_path: String::new(),
            ..SerialConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_validates() {
        assert!(SerialConfig::default().validate().is_ok());
    }
}
