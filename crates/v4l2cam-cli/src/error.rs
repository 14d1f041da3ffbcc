// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments or configuration
    InvalidArgs(String),
    /// Camera device not found, inaccessible, or not a device
    CameraNotFound(String),
    /// Device lacks streaming capture or the requested format
    Unsupported(String),
    /// No frame arrived in time
    Timeout(String),
    /// General error from the v4l2cam library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::CameraNotFound(msg) => write!(f, "Camera not found: {}", msg),
            CliError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::CameraNotFound(_) => 3,
            CliError::Unsupported(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map v4l2cam::Error to CliError with appropriate exit codes
impl From<v4l2cam::Error> for CliError {
    fn from(err: v4l2cam::Error) -> Self {
        use std::io::ErrorKind as Io;
        use v4l2cam::Error;

        let msg = err.to_string();
        match err {
            Error::InvalidFormatString(_) | Error::Config { .. } => CliError::InvalidArgs(msg),

            Error::NotACharacterDevice(_) => CliError::CameraNotFound(msg),
            Error::DeviceOpenFailed { ref source, .. }
                if matches!(source.kind(), Io::NotFound | Io::PermissionDenied) =>
            {
                CliError::CameraNotFound(msg)
            }

            Error::UnsupportedDevice { .. } | Error::UnsupportedFormat { .. } => {
                CliError::Unsupported(msg)
            }
            // ENOTTY: the node does not speak V4L2 at all
            Error::DeviceQuery { ref source, .. } if source.raw_os_error() == Some(25) => {
                CliError::Unsupported(msg)
            }

            _ => CliError::General(msg),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::General(format!("I/O error: {}", err))
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidArgs("test".into()).code(), 2);
        assert_eq!(CliError::CameraNotFound("test".into()).code(), 3);
        assert_eq!(CliError::Unsupported("test".into()).code(), 4);
        assert_eq!(CliError::Timeout("test".into()).code(), 6);
        assert_eq!(CliError::General("test".into()).code(), 1);
    }

    #[test]
    fn test_error_display() {
        let err = CliError::CameraNotFound("/dev/video0".to_string());
        assert_eq!(format!("{}", err), "Camera not found: /dev/video0");
    }

    #[test]
    fn test_library_error_mapping() {
        let err: CliError = v4l2cam::Error::NotACharacterDevice(PathBuf::from("/tmp/x")).into();
        assert_eq!(err.code(), 3);

        let err: CliError = v4l2cam::Error::DeviceOpenFailed {
            path: PathBuf::from("/dev/video9"),
            source: io::Error::from_raw_os_error(2),
        }
        .into();
        assert_eq!(err.code(), 3);

        let err: CliError = v4l2cam::Error::DeviceQuery {
            request: "VIDIOC_QUERYCAP",
            source: io::Error::from_raw_os_error(25),
        }
        .into();
        assert_eq!(err.code(), 4);

        let err: CliError = v4l2cam::Error::InvalidFormatString("YUV".into()).into();
        assert_eq!(err.code(), 2);

        let err: CliError = v4l2cam::Error::StreamOnFailed(io::Error::from_raw_os_error(16)).into();
        assert_eq!(err.code(), 1);
    }
}
