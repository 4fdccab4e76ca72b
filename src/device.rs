use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::config::{DataBits, FlowControl, Parity, SerialConfig, StopBits};
use crate::error::Error;

/// Map a numeric baud rate to its termios speed constant.
pub(crate) fn baud_to_speed(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        0 => libc::B0,
        50 => libc::B50,
        75 => libc::B75,
        110 => libc::B110,
        134 => libc::B134,
        150 => libc::B150,
        200 => libc::B200,
        300 => libc::B300,
        600 => libc::B600,
        1200 => libc::B1200,
        1800 => libc::B1800,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        460_800 => libc::B460800,
        921_600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}

/// An opened and configured serial device.
///
/// Opening applies raw-mode termios attributes from the [`SerialConfig`]:
/// baud, data bits, parity, stop bits, flow control, and optionally RTS/DTR.
/// The descriptor is owned; dropping the port closes it.
pub(crate) struct SerialPort {
    fd: OwnedFd,
}

impl SerialPort {
    /// Open `config.device_path` read/write and configure the line.
    pub(crate) fn open(config: &SerialConfig) -> Result<Self, Error> {
        let path = CString::new(config.device_path.as_str())
            .map_err(|_| Error::SocketCreate("device path contains an interior NUL".into()))?;

        let raw = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
            )
        };
        if raw < 0 {
            return Err(Error::SocketCreate(format!(
                "failed to open serial device '{}': {}",
                config.device_path,
                io::Error::last_os_error()
            )));
        }
        // Safety: `raw` is a freshly opened, owned descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut tty: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd.as_raw_fd(), &mut tty) } == -1 {
            return Err(Error::SocketBind(format!(
                "failed to get attributes for '{}': {}",
                config.device_path,
                io::Error::last_os_error()
            )));
        }

        let speed = baud_to_speed(config.baud_rate).ok_or_else(|| {
            Error::SocketBind(format!("unsupported baud rate {}", config.baud_rate))
        })?;
        if unsafe { libc::cfsetispeed(&mut tty, speed) } == -1
            || unsafe { libc::cfsetospeed(&mut tty, speed) } == -1
        {
            return Err(Error::SocketBind(format!(
                "failed to set baud rate for '{}': {}",
                config.device_path,
                io::Error::last_os_error()
            )));
        }

        // Data bits
        tty.c_cflag &= !libc::CSIZE;
        tty.c_cflag |= match config.data_bits {
            DataBits::Five => libc::CS5,
            DataBits::Six => libc::CS6,
            DataBits::Seven => libc::CS7,
            DataBits::Eight => libc::CS8,
        };

        // Parity
        match config.parity {
            Parity::None => tty.c_cflag &= !libc::PARENB,
            Parity::Odd => tty.c_cflag |= libc::PARENB | libc::PARODD,
            Parity::Even => {
                tty.c_cflag |= libc::PARENB;
                tty.c_cflag &= !libc::PARODD;
            }
        }

        // Stop bits
        match config.stop_bits {
            StopBits::Two => tty.c_cflag |= libc::CSTOPB,
            StopBits::One => tty.c_cflag &= !libc::CSTOPB,
        }

        // Flow control
        match config.flow_control {
            FlowControl::RtsCts => tty.c_cflag |= libc::CRTSCTS,
            _ => tty.c_cflag &= !libc::CRTSCTS,
        }

        // Input flags: raw input, no special byte handling.
        tty.c_iflag &= !(libc::IGNBRK
            | libc::BRKINT
            | libc::ICRNL
            | libc::INLCR
            | libc::PARMRK
            | libc::INPCK
            | libc::ISTRIP
            | libc::IXON
            | libc::IXOFF);
        if config.flow_control == FlowControl::XonXoff {
            tty.c_iflag |= libc::IXON | libc::IXOFF;
        }

        // Output flags: no post-processing.
        tty.c_oflag &= !libc::OPOST;

        // Local flags: raw mode.
        tty.c_lflag &=
            !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

        // Block until at least one byte is available.
        tty.c_cc[libc::VMIN] = 1;
        tty.c_cc[libc::VTIME] = 0;

        if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &tty) } == -1 {
            return Err(Error::SocketBind(format!(
                "failed to set attributes for '{}': {}",
                config.device_path,
                io::Error::last_os_error()
            )));
        }

        // RTS/DTR assertion is best-effort: many adapters and ptys reject the
        // modem ioctls.
        if config.rts_dtr_on {
            let mut status: libc::c_int = 0;
            if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMGET, &mut status) } != -1 {
                status |= libc::TIOCM_RTS | libc::TIOCM_DTR;
                unsafe {
                    libc::ioctl(fd.as_raw_fd(), libc::TIOCMSET, &status);
                }
            }
        }

        // Discard anything queued before configuration, then switch the
        // descriptor to blocking mode for the ring.
        unsafe {
            libc::tcflush(fd.as_raw_fd(), libc::TCIOFLUSH);
            let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0);
            libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK);
        }

        Ok(SerialPort { fd })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Discard unread input and unsent output.
    pub(crate) fn flush(&self) -> Result<(), Error> {
        if unsafe { libc::tcflush(self.fd.as_raw_fd(), libc::TCIOFLUSH) } == -1 {
            return Err(Error::SocketFlush(format!(
                "failed to flush serial device: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}
